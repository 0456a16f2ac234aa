//! Text cleanup and subtitle rendering

use once_cell::sync::Lazy;
use regex::Regex;
use speaches_core::TranscriptionSegment;

static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.*?)\*").unwrap());
static UNDERLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__(.*?)__").unwrap());
static UNDERSCORE_ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"_(.*?)_").unwrap());

/// Remove markdown emphasis markers. Idempotent; text without markers
/// passes through unchanged.
pub fn strip_markdown_emphasis(text: &str) -> String {
    let text = BOLD.replace_all(text, "$1");
    let text = ITALIC.replace_all(&text, "$1");
    let text = UNDERLINE.replace_all(&text, "$1");
    let text = UNDERSCORE_ITALIC.replace_all(&text, "$1");
    text.into_owned()
}

/// Remove emoji codepoints; TTS frontends render them as noise.
pub fn strip_emojis(text: &str) -> String {
    text.chars().filter(|ch| !is_emoji(*ch)).collect()
}

fn is_emoji(ch: char) -> bool {
    matches!(u32::from(ch),
        0x1F600..=0x1F64F  // emoticons
        | 0x1F300..=0x1F5FF  // symbols & pictographs
        | 0x1F680..=0x1F6FF  // transport & map symbols
        | 0x1F700..=0x1F77F  // alchemical symbols
        | 0x1F780..=0x1F7FF  // geometric shapes extended
        | 0x1F800..=0x1F8FF  // supplemental arrows
        | 0x1F900..=0x1F9FF  // supplemental symbols & pictographs
        | 0x1FA00..=0x1FA6F  // chess symbols
        | 0x1FA70..=0x1FAFF  // symbols & pictographs extended-A
        | 0x2702..=0x27B0    // dingbats
        | 0x24C2..=0x1F251
    )
}

/// Prepare one chunk of assistant text for synthesis: trim, strip
/// markdown emphasis, strip emoji, trim again. An empty result means
/// the chunk should be skipped.
pub fn clean_for_synthesis(text: &str) -> String {
    let text = text.trim();
    let text = strip_markdown_emphasis(text);
    let text = strip_emojis(&text);
    text.trim().to_string()
}

/// `HH:MM:SS,mmm`
pub fn srt_format_timestamp(ts: f64) -> String {
    let hours = (ts / 3600.0).floor() as u64;
    let minutes = ((ts % 3600.0) / 60.0).floor() as u64;
    let seconds = (ts % 60.0).floor() as u64;
    let millis = ((ts * 1000.0) % 1000.0).floor() as u64;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

/// `HH:MM:SS.mmm`
pub fn vtt_format_timestamp(ts: f64) -> String {
    let hours = (ts / 3600.0).floor() as u64;
    let minutes = ((ts % 3600.0) / 60.0).floor() as u64;
    let seconds = (ts % 60.0).floor() as u64;
    let millis = ((ts * 1000.0) % 1000.0).floor() as u64;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

/// One SRT cue. Cues are numbered from 1.
pub fn segments_to_srt(segment: &TranscriptionSegment, index: usize) -> String {
    format!(
        "{}\n{} --> {}\n{}\n\n",
        index + 1,
        srt_format_timestamp(segment.start),
        srt_format_timestamp(segment.end),
        segment.text
    )
}

/// One VTT cue; the first carries the `WEBVTT` preamble and starts at 0.
pub fn segments_to_vtt(segment: &TranscriptionSegment, index: usize) -> String {
    let start = if index > 0 { segment.start } else { 0.0 };
    let cue = format!(
        "{} --> {}\n{}\n\n",
        vtt_format_timestamp(start),
        vtt_format_timestamp(segment.end),
        segment.text
    );
    if index == 0 {
        format!("WEBVTT\n\n{cue}")
    } else {
        cue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: f64, end: f64, text: &str) -> TranscriptionSegment {
        TranscriptionSegment {
            id: 0,
            seek: 0,
            start,
            end,
            text: text.to_string(),
            tokens: vec![],
            temperature: 0.0,
            avg_logprob: 0.0,
            compression_ratio: 1.0,
            no_speech_prob: 0.0,
            words: None,
        }
    }

    #[test]
    fn test_srt_format_timestamp() {
        assert_eq!(srt_format_timestamp(0.0), "00:00:00,000");
        assert_eq!(srt_format_timestamp(1.234), "00:00:01,234");
        assert_eq!(srt_format_timestamp(60.0), "00:01:00,000");
        assert_eq!(srt_format_timestamp(61.234), "00:01:01,234");
        assert_eq!(srt_format_timestamp(3600.0), "01:00:00,000");
        assert_eq!(srt_format_timestamp(3601.234), "01:00:01,234");
        assert_eq!(srt_format_timestamp(23423.4234), "06:30:23,423");
    }

    #[test]
    fn test_vtt_format_timestamp() {
        assert_eq!(vtt_format_timestamp(0.0), "00:00:00.000");
        assert_eq!(vtt_format_timestamp(1.234), "00:00:01.234");
        assert_eq!(vtt_format_timestamp(3601.234), "01:00:01.234");
        assert_eq!(vtt_format_timestamp(23423.4234), "06:30:23.423");
    }

    #[test]
    fn test_strip_markdown_emphasis() {
        assert_eq!(
            strip_markdown_emphasis("Hello my name is **Jon**"),
            "Hello my name is Jon"
        );
        assert_eq!(strip_markdown_emphasis("I *really* like this"), "I really like this");
        assert_eq!(strip_markdown_emphasis("This is __underlined__"), "This is underlined");
        assert_eq!(strip_markdown_emphasis("This is _italic_"), "This is italic");
        assert_eq!(
            strip_markdown_emphasis("Nested **bold *with italic* inside**"),
            "Nested bold with italic inside"
        );
    }

    #[test]
    fn test_strip_markdown_emphasis_is_idempotent() {
        let inputs = [
            "Mixed **bold** and *italic* text",
            "No markdown here",
            "dangling *star and _underscore",
        ];
        for input in inputs {
            let once = strip_markdown_emphasis(input);
            let twice = strip_markdown_emphasis(&once);
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(strip_markdown_emphasis("No markdown here"), "No markdown here");
    }

    #[test]
    fn test_strip_emojis() {
        assert_eq!(strip_emojis("Hello \u{1F600} world \u{1F680}"), "Hello  world ");
        assert_eq!(strip_emojis("plain text"), "plain text");
    }

    #[test]
    fn test_clean_for_synthesis() {
        assert_eq!(
            clean_for_synthesis("  **Great!** \u{1F389}  "),
            "Great!"
        );
        assert_eq!(clean_for_synthesis(" \u{1F389} "), "");
    }

    #[test]
    fn test_srt_cue() {
        let cue = segments_to_srt(&segment(1.0, 2.5, " Hello"), 0);
        assert_eq!(cue, "1\n00:00:01,000 --> 00:00:02,500\n Hello\n\n");
    }

    #[test]
    fn test_vtt_first_cue_has_preamble_and_zero_start() {
        let cue = segments_to_vtt(&segment(1.0, 2.5, " Hello"), 0);
        assert!(cue.starts_with("WEBVTT\n\n00:00:00.000 --> 00:00:02.500"));

        let second = segments_to_vtt(&segment(2.5, 4.0, " there"), 1);
        assert!(second.starts_with("00:00:02.500 --> 00:00:04.000"));
    }
}
