//! Format Selector
//!
//! Derives the simplified quality-label list shown in the quality dropdown
//! and maps either a (quality, sound-mode) pair or an explicitly highlighted
//! format row to the yt-dlp format expression the coordinator passes to `-f`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::FormatOption;

/// Which streams the quality-based selector should request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundMode {
    VideoAndAudio,
    AudioOnly,
    VideoOnly,
}

/// The user's current choice, mirroring the two selection tabs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FormatSelection {
    /// Quality tab: a label from `derive_quality_labels` plus a sound mode.
    Quality { label: String, sound: SoundMode },

    /// Expert tab: the `format_id` of the highlighted table row, or `None`
    /// when no row is highlighted.
    Explicit { format_id: Option<String> },
}

/// Selection problems are caller errors. They are reported locally and must
/// never reach the download coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no format row is selected")]
    NoRowSelected,

    #[error("quality label {0:?} is not of the form \"<height>p\"")]
    BadQualityLabel(String),
}

/// Distinct user-facing quality labels for a format list, sorted ascending by
/// numeric height so the last entry is the best quality (the UI default).
///
/// Labels come from `format_note` values with a trailing "p" and a numeric
/// prefix ("480p" < "720p" < "1080p", and "9p" < "10p"). When the extractor
/// reports no such notes, labels are synthesized as `"{height}p"` from every
/// format carrying a height.
pub fn derive_quality_labels(formats: &[FormatOption]) -> Vec<String> {
    let mut labels = distinct_note_labels(formats);
    if labels.is_empty() {
        labels = synthesized_height_labels(formats);
    }
    labels.sort_by_key(|label| label_height(label).unwrap_or(0));
    labels
}

/// Resolve the current selection to a yt-dlp format expression.
pub fn resolve_selection(selection: &FormatSelection) -> Result<String, SelectionError> {
    match selection {
        FormatSelection::Quality { label, sound } => {
            // Audio-only ignores the quality label entirely.
            if *sound == SoundMode::AudioOnly {
                return Ok("bestaudio/best".to_string());
            }
            let height =
                label_height(label).ok_or_else(|| SelectionError::BadQualityLabel(label.clone()))?;
            Ok(match sound {
                SoundMode::VideoAndAudio => {
                    format!("bestvideo[height={height}]+bestaudio/best")
                }
                SoundMode::VideoOnly => format!("bestvideo[height={height}]/best"),
                SoundMode::AudioOnly => unreachable!("handled above"),
            })
        }
        FormatSelection::Explicit { format_id } => format_id
            .as_ref()
            .filter(|id| !id.is_empty())
            .cloned()
            .ok_or(SelectionError::NoRowSelected),
    }
}

/// The quality label shown in history for this selection: the chosen label on
/// the quality tab, the raw format id on the expert tab.
pub fn selection_quality_label(selection: &FormatSelection) -> Result<String, SelectionError> {
    match selection {
        FormatSelection::Quality { label, .. } => Ok(label.clone()),
        FormatSelection::Explicit { format_id } => format_id
            .as_ref()
            .filter(|id| !id.is_empty())
            .cloned()
            .ok_or(SelectionError::NoRowSelected),
    }
}

/// Numeric height encoded in a label like "1080p", if well-formed.
fn label_height(label: &str) -> Option<u32> {
    label.strip_suffix('p')?.parse::<u32>().ok()
}

fn distinct_note_labels(formats: &[FormatOption]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    for note in formats.iter().filter_map(|f| f.format_note.as_deref()) {
        if label_height(note).is_some() && seen.insert(note) {
            out.push(note.to_string());
        }
    }
    out
}

fn synthesized_height_labels(formats: &[FormatOption]) -> Vec<String> {
    let mut seen: HashSet<u32> = HashSet::new();
    let mut out = Vec::new();
    for height in formats.iter().filter_map(|f| f.height) {
        if seen.insert(height) {
            out.push(format!("{height}p"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt_with_note(id: &str, note: &str) -> FormatOption {
        FormatOption {
            format_id: id.to_string(),
            format_note: Some(note.to_string()),
            ..Default::default()
        }
    }

    fn fmt_with_height(id: &str, height: u32) -> FormatOption {
        FormatOption {
            format_id: id.to_string(),
            height: Some(height),
            ..Default::default()
        }
    }

    #[test]
    fn labels_from_notes_dedup_and_numeric_sort() {
        let formats = vec![
            fmt_with_note("1", "720p"),
            fmt_with_note("2", "1080p"),
            fmt_with_note("3", "480p"),
            fmt_with_note("4", "720p"),
        ];
        assert_eq!(derive_quality_labels(&formats), vec!["480p", "720p", "1080p"]);
    }

    #[test]
    fn numeric_sort_not_lexicographic() {
        let formats = vec![fmt_with_note("1", "10p"), fmt_with_note("2", "9p")];
        assert_eq!(derive_quality_labels(&formats), vec!["9p", "10p"]);
    }

    #[test]
    fn non_quality_notes_ignored() {
        let formats = vec![
            fmt_with_note("1", "medium"),
            fmt_with_note("2", "720p60"),
            fmt_with_note("3", "1080p"),
        ];
        // "medium" has no trailing p, "720p60" does not end in p.
        assert_eq!(derive_quality_labels(&formats), vec!["1080p"]);
    }

    #[test]
    fn falls_back_to_heights_when_no_notes() {
        let formats = vec![
            fmt_with_height("1", 720),
            fmt_with_height("2", 1080),
            fmt_with_height("3", 720),
            FormatOption {
                format_id: "audio".to_string(),
                ..Default::default()
            },
        ];
        assert_eq!(derive_quality_labels(&formats), vec!["720p", "1080p"]);
    }

    #[test]
    fn notes_win_over_heights() {
        let formats = vec![fmt_with_note("1", "480p"), fmt_with_height("2", 2160)];
        assert_eq!(derive_quality_labels(&formats), vec!["480p"]);
    }

    #[test]
    fn empty_format_list_yields_no_labels() {
        assert!(derive_quality_labels(&[]).is_empty());
    }

    #[test]
    fn quality_mode_video_and_audio() {
        let sel = FormatSelection::Quality {
            label: "720p".to_string(),
            sound: SoundMode::VideoAndAudio,
        };
        assert_eq!(
            resolve_selection(&sel).unwrap(),
            "bestvideo[height=720]+bestaudio/best"
        );
    }

    #[test]
    fn quality_mode_audio_only_ignores_label() {
        for label in ["720p", "1080p", "whatever"] {
            let sel = FormatSelection::Quality {
                label: label.to_string(),
                sound: SoundMode::AudioOnly,
            };
            assert_eq!(resolve_selection(&sel).unwrap(), "bestaudio/best");
        }
    }

    #[test]
    fn quality_mode_video_only() {
        let sel = FormatSelection::Quality {
            label: "720p".to_string(),
            sound: SoundMode::VideoOnly,
        };
        assert_eq!(resolve_selection(&sel).unwrap(), "bestvideo[height=720]/best");
    }

    #[test]
    fn malformed_quality_label_is_rejected() {
        let sel = FormatSelection::Quality {
            label: "best".to_string(),
            sound: SoundMode::VideoAndAudio,
        };
        assert_eq!(
            resolve_selection(&sel),
            Err(SelectionError::BadQualityLabel("best".to_string()))
        );
    }

    #[test]
    fn explicit_mode_returns_format_id_verbatim() {
        let sel = FormatSelection::Explicit {
            format_id: Some("137+140".to_string()),
        };
        assert_eq!(resolve_selection(&sel).unwrap(), "137+140");
    }

    #[test]
    fn explicit_mode_without_row_is_a_selection_error() {
        let sel = FormatSelection::Explicit { format_id: None };
        assert_eq!(resolve_selection(&sel), Err(SelectionError::NoRowSelected));

        let empty = FormatSelection::Explicit {
            format_id: Some(String::new()),
        };
        assert_eq!(resolve_selection(&empty), Err(SelectionError::NoRowSelected));
    }
}
