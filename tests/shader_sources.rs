//! Multi-stage shader source handling through the public parser API.

use scoria::shader::{parse, with_preamble, ParseError, ShaderStage};

const LIT: &str = r#"
#pragma stage : vertex
void main() {
    gl_Position = vec4(0.0, 0.0, 0.0, 1.0);
}
#pragma stage : fragment
layout(location = 0) out vec4 out_color;
void main() {
    out_color = vec4(1.0);
}
"#;

#[test]
fn vertex_fragment_pair_splits_into_two_entries() {
    let parsed = parse(LIT).unwrap();
    assert_eq!(parsed.entries.len(), 2);

    let vertex = parsed.find_stage(ShaderStage::Vertex, "").unwrap();
    assert!(vertex.entry_name.is_empty());
    assert!(vertex.source.contains("gl_Position"));

    let fragment = parsed.find_stage(ShaderStage::Fragment, "").unwrap();
    assert!(fragment.entry_name.is_empty());
    assert!(fragment.source.contains("out_color"));
}

#[test]
fn named_compute_kernels_parse_separately() {
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
    assert!(parsed
        .find_stage(ShaderStage::Compute, "secondary_kernel")
        .is_some());
}

#[test]
fn pragma_without_colon_is_rejected() {
    let err = parse("#pragma stage vertex\nvoid main() {}\n").unwrap_err();
    assert_eq!(err, ParseError::InvalidPragmaSyntax);
}

#[test]
fn duplicate_stage_entries_are_rejected() {
    let source = "#pragma stage : vertex\nvoid main() {}\n#pragma stage : vertex\nvoid main() {}\n";
    assert_eq!(parse(source).unwrap_err(), ParseError::DuplicateStageEntry);
}

#[test]
fn preamble_is_idempotent_over_parsed_stages() {
    let parsed = parse(LIT).unwrap();
    for entry in &parsed.entries {
        let once = with_preamble(&entry.source);
        assert!(once.starts_with("#version 460"));
        assert!(once.contains("GL_GOOGLE_include_directive"));
        assert_eq!(with_preamble(&once), once);
    }
}
