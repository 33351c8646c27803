//! Embedded WGSL shaders
//!
//! Fragment-only shaders share the fullscreen triangle vertex stage from
//! `fullscreen.wgsl`; use [`with_fullscreen_vertex`] to build a complete module.

/// Fullscreen triangle vertex stage (`vs_main`) and its `VertexOutput`
pub const FULLSCREEN_VERTEX: &str = include_str!("fullscreen.wgsl");

/// NV12 to RGB conversion fragment stage
pub const YUV_TO_RGB_FRAGMENT: &str = include_str!("yuv_to_rgb.wgsl");

/// Color inversion fragment stage
pub const INVERT_FRAGMENT: &str = include_str!("invert.wgsl");

/// Block pixellation fragment stage
pub const PIXELLATE_FRAGMENT: &str = include_str!("pixellate.wgsl");

/// Self-contained surface presentation shader
pub const PRESENT_SHADER: &str = include_str!("present.wgsl");

/// Prepend the fullscreen vertex stage to a fragment stage
pub fn with_fullscreen_vertex(fragment: &str) -> String {
    format!("{}\n{}", FULLSCREEN_VERTEX, fragment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_shaders_have_entry_point() {
        for source in [YUV_TO_RGB_FRAGMENT, INVERT_FRAGMENT, PIXELLATE_FRAGMENT] {
            assert!(source.contains("fn fs_main"));
            assert!(!source.contains("fn vs_main"));
        }
    }

    #[test]
    fn test_composed_module_has_both_stages() {
        let module = with_fullscreen_vertex(YUV_TO_RGB_FRAGMENT);
        assert!(module.contains("fn vs_main"));
        assert!(module.contains("fn fs_main"));
        assert!(module.contains("@binding(3)"));
    }

    #[test]
    fn test_present_shader_is_standalone() {
        assert!(PRESENT_SHADER.contains("fn vs_main"));
        assert!(PRESENT_SHADER.contains("fn fs_main"));
    }
}
