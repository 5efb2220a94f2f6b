//! Caption layout and the `drawtext` filter that renders it.

use std::path::Path;

/// Appearance of burned-in captions.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionStyle {
    /// Maximum characters per line.
    pub wrap_width: usize,
    pub font_size: u32,
    /// Font file for `drawtext`; ffmpeg's default font when absent.
    pub font_file: Option<String>,
}

/// Greedy word wrap. Words longer than `width` get a line of their own.
pub fn wrap_caption(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };

        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Quote a value for use as a filter option.
pub(crate) fn quote_filter_value(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// `drawtext` filter drawing the caption stored in `text_file`, anchored
/// bottom-centre, fading in and out over `fade_secs` within a clip of
/// `clip_secs`.
pub fn drawtext_filter(
    text_file: &Path,
    style: &CaptionStyle,
    clip_secs: f64,
    fade_secs: f64,
) -> String {
    let fade = fade_secs.clamp(0.0, clip_secs / 2.0);
    let alpha = if fade > 0.0 {
        format!(
            "if(lt(t,{fade:.3}),t/{fade:.3},if(gt(t,{out:.3}),max(0,({clip:.3}-t)/{fade:.3}),1))",
            out = clip_secs - fade,
            clip = clip_secs,
        )
    } else {
        "1".to_string()
    };

    // Caption text is literal: no `%{..}` expansion, no backslash escapes.
    let mut filter = format!(
        "drawtext=textfile={}:expansion=none:fontsize={}:fontcolor=white:line_spacing=6\
         :x=(w-text_w)/2:y=h-text_h-32:box=1:boxcolor=black@0.5:boxborderw=10\
         :alpha={}",
        quote_filter_value(&text_file.to_string_lossy()),
        style.font_size,
        quote_filter_value(&alpha),
    );
    if let Some(font) = &style.font_file {
        filter.push_str(":fontfile=");
        filter.push_str(&quote_filter_value(font));
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_at_width() {
        let text = "The old keeper climbed the spiral stairs every night to light the lamp for ships far away";
        let lines = wrap_caption(text, 50);
        assert!(lines.len() >= 2);
        assert!(lines.iter().all(|l| l.chars().count() <= 50));
        assert_eq!(lines.join(" "), text);
    }

    #[test]
    fn long_word_gets_own_line() {
        let lines = wrap_caption("a supercalifragilistic b", 10);
        assert_eq!(lines, vec!["a", "supercalifragilistic", "b"]);
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(wrap_caption("  one\n two  ", 50), vec!["one two"]);
        assert!(wrap_caption("   ", 50).is_empty());
    }

    #[test]
    fn drawtext_fades_within_clip() {
        let style = CaptionStyle {
            wrap_width: 50,
            font_size: 24,
            font_file: None,
        };
        let filter = drawtext_filter(Path::new("/tmp/caption_0.txt"), &style, 10.0, 0.5);
        assert!(filter.starts_with("drawtext=textfile='/tmp/caption_0.txt':expansion=none"));
        assert!(filter.contains("fontsize=24"));
        assert!(filter.contains("x=(w-text_w)/2"));
        assert!(filter.contains("gt(t,9.500)"));
        assert!(!filter.contains("fontfile"));
    }

    #[test]
    fn drawtext_uses_font_file() {
        let style = CaptionStyle {
            wrap_width: 50,
            font_size: 30,
            font_file: Some("/fonts/It's Serif.ttf".into()),
        };
        let filter = drawtext_filter(Path::new("/tmp/c.txt"), &style, 4.0, 3.0);
        assert!(filter.ends_with(r"fontfile='/fonts/It'\''s Serif.ttf'"));
        // Fade is capped at half the clip.
        assert!(filter.contains("lt(t,2.000)"));
    }
}
