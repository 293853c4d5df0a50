//! Shader parsing, compilation and reflection.
//!
//! A shader file holds several stages in one source, each introduced by a
//! pragma:
//!
//! ```glsl
//! #pragma stage : vertex
//! void main() { gl_Position = vec4(0); }
//!
//! #pragma stage : fragment
//! layout(location = 0) out vec4 out_color;
//! void main() { out_color = vec4(1); }
//! ```
//!
//! Compute stages may carry a quoted entry name, `#pragma stage :
//! compute("kernel")`, so one file can hold several kernels. Parsing is a
//! two-pass split; compilation goes through `shaderc` targeting Vulkan 1.3 /
//! SPIR-V 1.6, and push-constant ranges are reflected out of the resulting
//! SPIR-V with `rspirv-reflect`.

use std::collections::HashMap;

use ash::vk;
use thiserror::Error;

use crate::error::Error;

/// Errors from the pragma parser.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid pragma syntax")]
    InvalidPragmaSyntax,
    #[error("unknown shader stage")]
    UnknownShaderStage,
    #[error("duplicate stage entry")]
    DuplicateStageEntry,
    #[error("missing stage content")]
    MissingStageContent,
    #[error("invalid compute entry name")]
    InvalidComputeEntryName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    TessellationControl,
    TessellationEvaluation,
    Compute,
    Task,
    Mesh,
}

impl ShaderStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Geometry => "geometry",
            ShaderStage::TessellationControl => "tessellation_control",
            ShaderStage::TessellationEvaluation => "tessellation_evaluation",
            ShaderStage::Compute => "compute",
            ShaderStage::Task => "task",
            ShaderStage::Mesh => "mesh",
        }
    }

    pub fn parse(stage: &str) -> Result<Self, ParseError> {
        match stage {
            "vertex" => Ok(ShaderStage::Vertex),
            "fragment" => Ok(ShaderStage::Fragment),
            "geometry" => Ok(ShaderStage::Geometry),
            "tessellation_control" => Ok(ShaderStage::TessellationControl),
            "tessellation_evaluation" => Ok(ShaderStage::TessellationEvaluation),
            "compute" => Ok(ShaderStage::Compute),
            "task" => Ok(ShaderStage::Task),
            "mesh" => Ok(ShaderStage::Mesh),
            _ => Err(ParseError::UnknownShaderStage),
        }
    }

    pub fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            ShaderStage::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
            ShaderStage::Task => vk::ShaderStageFlags::TASK_EXT,
            ShaderStage::Mesh => vk::ShaderStageFlags::MESH_EXT,
        }
    }

    fn to_shaderc(self) -> shaderc::ShaderKind {
        match self {
            ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
            ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
            ShaderStage::Geometry => shaderc::ShaderKind::Geometry,
            ShaderStage::TessellationControl => shaderc::ShaderKind::TessControl,
            ShaderStage::TessellationEvaluation => shaderc::ShaderKind::TessEvaluation,
            ShaderStage::Compute => shaderc::ShaderKind::Compute,
            ShaderStage::Task => shaderc::ShaderKind::Task,
            ShaderStage::Mesh => shaderc::ShaderKind::Mesh,
        }
    }
}

/// One stage block extracted from a multi-stage source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageEntry {
    pub stage: ShaderStage,
    /// Empty for anonymous stages; the quoted name for named compute kernels.
    pub entry_name: String,
    pub source: String,
    /// 1-based line of the introducing pragma in the original file.
    pub line_number: usize,
}

/// The result of splitting a multi-stage source file.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParsedShader {
    pub entries: Vec<StageEntry>,
    lookup: HashMap<(ShaderStage, String), usize>,
}

impl ParsedShader {
    /// Finds the entry for `stage` with the given kernel name ("" for
    /// anonymous stages).
    pub fn find_stage(&self, stage: ShaderStage, entry_name: &str) -> Option<&StageEntry> {
        self.lookup
            .get(&(stage, entry_name.to_owned()))
            .map(|&i| &self.entries[i])
    }

    pub fn find_all_compute_stages(&self) -> Vec<&StageEntry> {
        self.entries
            .iter()
            .filter(|e| e.stage == ShaderStage::Compute)
            .collect()
    }
}

struct PragmaInfo {
    stage: ShaderStage,
    entry_name: String,
    line_number: usize,
}

fn is_stage_pragma(line: &str) -> bool {
    line.starts_with("#pragma stage") || line.starts_with("# pragma stage")
}

fn parse_pragma_line(line: &str, line_number: usize) -> Result<PragmaInfo, ParseError> {
    let line = line.trim();
    if !line.starts_with("#pragma") && !line.starts_with("# pragma") {
        return Err(ParseError::InvalidPragmaSyntax);
    }
    let stage_pos = line.find("stage").ok_or(ParseError::InvalidPragmaSyntax)?;
    let colon_pos = line[stage_pos..]
        .find(':')
        .map(|p| p + stage_pos)
        .ok_or(ParseError::InvalidPragmaSyntax)?;
    let remainder = line[colon_pos + 1..].trim();

    if let Some(compute_part) = remainder.strip_prefix("compute") {
        let compute_part = compute_part.trim();
        let entry_name = if compute_part.starts_with('(') {
            let quote_start = compute_part
                .find('"')
                .ok_or(ParseError::InvalidComputeEntryName)?;
            let quote_end = compute_part[quote_start + 1..]
                .find('"')
                .map(|p| p + quote_start + 1)
                .ok_or(ParseError::InvalidComputeEntryName)?;
            compute_part[quote_start + 1..quote_end].to_owned()
        } else if !compute_part.is_empty() {
            return Err(ParseError::InvalidPragmaSyntax);
        } else {
            String::new()
        };
        return Ok(PragmaInfo {
            stage: ShaderStage::Compute,
            entry_name,
            line_number,
        });
    }

    Ok(PragmaInfo {
        stage: ShaderStage::parse(remainder)?,
        entry_name: String::new(),
        line_number,
    })
}

/// Splits a multi-stage source into per-stage blocks.
///
/// Pass one collects and validates the pragmas; pass two assigns every
/// non-pragma line to the most recent stage. Duplicate `(stage, entry)`
/// pairs are rejected.
pub fn parse(source: &str) -> Result<ParsedShader, ParseError> {
    let mut pragmas = Vec::new();
    for (i, line) in source.lines().enumerate() {
        let trimmed = line.trim();
        if is_stage_pragma(trimmed) {
            pragmas.push(parse_pragma_line(trimmed, i + 1)?);
        }
    }
    if pragmas.is_empty() {
        return Err(ParseError::MissingStageContent);
    }

    let mut parsed = ParsedShader::default();
    let mut current: Option<usize> = None;
    let mut content = String::new();

    let mut flush = |parsed: &mut ParsedShader,
                     pragma_index: usize,
                     content: &mut String|
     -> Result<(), ParseError> {
        let pragma = &pragmas[pragma_index];
        let key = (pragma.stage, pragma.entry_name.clone());
        if parsed.lookup.contains_key(&key) {
            return Err(ParseError::DuplicateStageEntry);
        }
        parsed.entries.push(StageEntry {
            stage: pragma.stage,
            entry_name: pragma.entry_name.clone(),
            // Lines stay verbatim so concatenating the stage sources gives
            // back the non-pragma lines of the input, and compile errors keep
            // their line positions.
            source: std::mem::take(content),
            line_number: pragma.line_number,
        });
        parsed.lookup.insert(key, parsed.entries.len() - 1);
        Ok(())
    };

    for line in source.lines() {
        if is_stage_pragma(line.trim()) {
            if let Some(prev) = current {
                flush(&mut parsed, prev, &mut content)?;
            }
            current = Some(current.map_or(0, |i| i + 1));
        } else if current.is_some() {
            content.push_str(line);
            content.push('\n');
        }
    }
    if let Some(last) = current {
        flush(&mut parsed, last, &mut content)?;
    }

    Ok(parsed)
}

const PREAMBLE_VERSION: &str = "#version 460";
const PREAMBLE_EXTENSION: &str = "#extension GL_GOOGLE_include_directive : enable";

/// Ensures the stage source opens with `#version 460` followed by the include
/// extension. Idempotent: applying it twice equals applying it once.
pub fn with_preamble(source: &str) -> String {
    if let Some(version_line) = source.lines().find(|l| l.trim_start().starts_with("#version")) {
        if source
            .lines()
            .any(|l| l.trim_start().starts_with("#extension GL_GOOGLE_include_directive"))
        {
            return source.to_owned();
        }
        // Keep the author's #version line, slot the extension right after it.
        let mut out = String::with_capacity(source.len() + PREAMBLE_EXTENSION.len() + 1);
        for line in source.lines() {
            out.push_str(line);
            out.push('\n');
            if line == version_line {
                out.push_str(PREAMBLE_EXTENSION);
                out.push('\n');
            }
        }
        out
    } else {
        format!("{PREAMBLE_VERSION}\n{PREAMBLE_EXTENSION}\n{source}")
    }
}

/// Aggregated push-constant usage of a shader module: the union over every
/// stage's reflected blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushConstantInfo {
    pub size: u32,
    pub stages: vk::ShaderStageFlags,
}

/// Compiles one stage block to SPIR-V.
pub fn compile_stage(
    compiler: &shaderc::Compiler,
    stage: ShaderStage,
    source: &str,
    file_name: &str,
) -> Result<Vec<u8>, Error> {
    let mut options = shaderc::CompileOptions::new().ok_or_else(|| Error::Compile {
        stage,
        log: "failed to initialise compile options".to_owned(),
    })?;
    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_3 as u32,
    );
    options.set_target_spirv(shaderc::SpirvVersion::V1_6);

    let artifact = compiler
        .compile_into_spirv(source, stage.to_shaderc(), file_name, "main", Some(&options))
        .map_err(|err| Error::Compile {
            stage,
            log: err.to_string(),
        })?;
    Ok(artifact.as_binary_u8().to_vec())
}

/// Reflects the push-constant range out of one stage's SPIR-V and unions it
/// into `info`.
pub fn reflect_push_constants(
    spirv: &[u8],
    stage: ShaderStage,
    info: &mut PushConstantInfo,
) -> Result<(), Error> {
    let reflection =
        rspirv_reflect::Reflection::new_from_spirv(spirv).map_err(|err| Error::Compile {
            stage,
            log: format!("reflection failed: {err}"),
        })?;
    if let Some(range) = reflection
        .get_push_constant_range()
        .map_err(|err| Error::Compile {
            stage,
            log: format!("reflection failed: {err}"),
        })?
    {
        info.size = info.size.max(range.offset + range.size);
        info.stages |= stage.to_vk();
    }
    Ok(())
}

/// One compiled stage inside a [`ShaderModule`].
#[derive(Debug)]
pub struct StageModule {
    pub stage: ShaderStage,
    pub entry_name: String,
    pub module: vk::ShaderModule,
}

/// A pooled shader module: every stage of one source file, compiled, plus the
/// aggregated push-constant range.
#[derive(Debug, Default)]
pub struct ShaderModule {
    pub(crate) stages: Vec<StageModule>,
    pub(crate) push_constants: PushConstantInfo,
    pub(crate) debug_name: String,
}

impl ShaderModule {
    /// The stage flags covered by this module.
    pub fn stage_flags(&self) -> vk::ShaderStageFlags {
        self.stages
            .iter()
            .fold(vk::ShaderStageFlags::empty(), |acc, s| acc | s.stage.to_vk())
    }

    pub fn push_constants(&self) -> PushConstantInfo {
        self.push_constants
    }

    pub(crate) fn stage(&self, stage: ShaderStage, entry_name: &str) -> Option<&StageModule> {
        self.stages
            .iter()
            .find(|s| s.stage == stage && s.entry_name == entry_name)
    }
}

impl Default for StageModule {
    fn default() -> Self {
        Self {
            stage: ShaderStage::Vertex,
            entry_name: String::new(),
            module: vk::ShaderModule::null(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERT_FRAG: &str = r#"
#pragma stage : vertex
layout(location = 0) in vec3 position;
void main() {
    gl_Position = vec4(position, 1.0);
}

#pragma stage : fragment
layout(location = 0) out vec4 out_color;
void main() {
    out_color = vec4(1.0);
}
"#;

    #[test]
    fn parses_vertex_and_fragment() {
        let parsed = parse(VERT_FRAG).unwrap();
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].stage, ShaderStage::Vertex);
        assert_eq!(parsed.entries[1].stage, ShaderStage::Fragment);
        assert!(parsed.entries.iter().all(|e| e.entry_name.is_empty()));
        assert!(parsed.entries[0].source.contains("gl_Position"));
        assert!(parsed.entries[1].source.contains("out_color"));
        assert!(parsed.find_stage(ShaderStage::Vertex, "").is_some());
        assert!(parsed.find_stage(ShaderStage::Geometry, "").is_none());
    }

    #[test]
    fn parses_named_compute_kernels() {
        let source = r#"
#pragma stage : compute("main_kernel")
layout(local_size_x = 64) in;
void main() {}

#pragma stage : compute("secondary_kernel")
layout(local_size_x = 8, local_size_y = 8) in;
void main() {}
"#;
        let parsed = parse(source).unwrap();
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].entry_name, "main_kernel");
        assert_eq!(parsed.entries[1].entry_name, "secondary_kernel");
        assert_eq!(parsed.find_all_compute_stages().len(), 2);
        assert!(parsed.find_stage(ShaderStage::Compute, "main_kernel").is_some());
    }

    #[test]
    fn stage_sources_keep_lines_verbatim() {
        let source =
            "#pragma stage : vertex\n\nvoid main() {}\n\n#pragma stage : fragment\nvoid main() {}\n";
        let parsed = parse(source).unwrap();
        assert_eq!(parsed.entries[0].source, "\nvoid main() {}\n\n");
        assert_eq!(parsed.entries[1].source, "void main() {}\n");

        // Concatenating the stage sources gives back every non-pragma line.
        let rejoined: String = parsed.entries.iter().map(|e| e.source.as_str()).collect();
        assert_eq!(rejoined, "\nvoid main() {}\n\nvoid main() {}\n");
    }

    #[test]
    fn bare_pragma_without_colon_is_rejected() {
        let source = "#pragma stage vertex\nvoid main() {}\n";
        assert_eq!(parse(source), Err(ParseError::InvalidPragmaSyntax));
    }

    #[test]
    fn space_after_hash_is_accepted() {
        let source = "# pragma stage : compute\nvoid main() {}\n";
        let parsed = parse(source).unwrap();
        assert_eq!(parsed.entries[0].stage, ShaderStage::Compute);
        assert_eq!(parsed.entries[0].entry_name, "");
    }

    #[test]
    fn unknown_stage_is_rejected() {
        assert_eq!(
            parse("#pragma stage : raygen\nvoid main() {}\n"),
            Err(ParseError::UnknownShaderStage)
        );
    }

    #[test]
    fn unquoted_compute_entry_is_rejected() {
        assert_eq!(
            parse("#pragma stage : compute(main)\nvoid main() {}\n"),
            Err(ParseError::InvalidComputeEntryName)
        );
    }

    #[test]
    fn trailing_junk_after_compute_is_rejected() {
        assert_eq!(
            parse("#pragma stage : compute extra\nvoid main() {}\n"),
            Err(ParseError::InvalidPragmaSyntax)
        );
    }

    #[test]
    fn duplicate_stage_entry_is_rejected() {
        let source = "\
#pragma stage : vertex
void main() {}
#pragma stage : vertex
void main() {}
";
        assert_eq!(parse(source), Err(ParseError::DuplicateStageEntry));
    }

    #[test]
    fn no_pragmas_means_missing_content() {
        assert_eq!(parse("void main() {}\n"), Err(ParseError::MissingStageContent));
    }

    #[test]
    fn preamble_inserted_when_absent() {
        let out = with_preamble("void main() {}");
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some(PREAMBLE_VERSION));
        assert_eq!(lines.next(), Some(PREAMBLE_EXTENSION));
    }

    #[test]
    fn preamble_respects_existing_version() {
        let out = with_preamble("#version 450\nvoid main() {}");
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("#version 450"));
        assert_eq!(lines.next(), Some(PREAMBLE_EXTENSION));
    }

    #[test]
    fn preamble_is_idempotent() {
        let once = with_preamble("void main() {}");
        let twice = with_preamble(&once);
        assert_eq!(once, twice);

        let with_version = with_preamble("#version 460\nvoid main() {}");
        assert_eq!(with_preamble(&with_version), with_version);
    }

    #[test]
    fn stage_names_round_trip() {
        for stage in [
            ShaderStage::Vertex,
            ShaderStage::Fragment,
            ShaderStage::Geometry,
            ShaderStage::TessellationControl,
            ShaderStage::TessellationEvaluation,
            ShaderStage::Compute,
            ShaderStage::Task,
            ShaderStage::Mesh,
        ] {
            assert_eq!(ShaderStage::parse(stage.as_str()), Ok(stage));
        }
    }
}
