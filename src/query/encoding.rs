//! Text encoding detection for terms files.

use std::borrow::Cow;

use encoding_rs::{BIG5, EUC_JP, EUC_KR, Encoding, GBK, SHIFT_JIS, UTF_8, WINDOWS_1252};
use tracing::{debug, warn};

/// Legacy encodings tried when the input is not UTF-8, in tie-break order.
const CJK_CANDIDATES: [&Encoding; 5] = [SHIFT_JIS, EUC_JP, GBK, BIG5, EUC_KR];

/// The outcome of encoding detection.
#[derive(Debug, Clone, Copy)]
pub struct Detection {
    pub encoding: &'static Encoding,
    /// Between 0.0 and 1.0.
    pub confidence: f32,
}

fn is_cjk_char(c: char) -> bool {
    matches!(
        c,
        '\u{3000}'..='\u{303F}'
            | '\u{3040}'..='\u{30FF}'
            | '\u{3400}'..='\u{4DBF}'
            | '\u{4E00}'..='\u{9FFF}'
            | '\u{AC00}'..='\u{D7A3}'
            | '\u{FF01}'..='\u{FF5E}'
    )
}

fn is_latin_letter(c: char) -> bool {
    c.is_alphabetic() && c < '\u{0250}'
}

fn is_ascii_alphanumeric(c: Option<&char>) -> bool {
    c.is_some_and(char::is_ascii_alphanumeric)
}

/// A CJK character wedged between two ASCII letters or digits.
///
/// Misreading a Latin accent followed by a letter as a double-byte encoding yields
/// exactly this shape ("Pokémon" as Shift_JIS is "Pok駑on"); real CJK text keeps
/// its characters in runs or next to spaces and punctuation.
fn is_wedged(chars: &[char], index: usize) -> bool {
    let before = index.checked_sub(1).and_then(|i| chars.get(i));
    is_ascii_alphanumeric(before) && is_ascii_alphanumeric(chars.get(index + 1))
}

/// Share of non-ASCII characters accepted by `plausible`, which sees the whole
/// decoded text and the position of the character being judged.
#[allow(clippy::cast_precision_loss)]
fn plausibility(text: &str, plausible: impl Fn(&[char], usize) -> bool) -> f32 {
    let chars: Vec<char> = text.chars().collect();
    let mut total = 0usize;
    let mut accepted = 0usize;

    for (index, c) in chars.iter().enumerate() {
        if c.is_ascii() {
            continue;
        }
        total += 1;
        if plausible(&chars, index) {
            accepted += 1;
        }
    }

    if total == 0 {
        0.0
    } else {
        accepted as f32 / total as f32
    }
}

fn cjk_plausibility(text: &str) -> f32 {
    plausibility(text, |chars, index| {
        is_cjk_char(chars[index]) && !is_wedged(chars, index)
    })
}

fn latin_plausibility(text: &str) -> f32 {
    plausibility(text, |chars, index| is_latin_letter(chars[index]))
}

fn decode_strict<'a>(encoding: &'static Encoding, bytes: &'a [u8]) -> Option<Cow<'a, str>> {
    encoding.decode_without_bom_handling_and_without_replacement(bytes)
}

/// Guess the encoding of `bytes`.
///
/// A byte-order mark or valid UTF-8 is certain. Otherwise every legacy candidate
/// that decodes without errors is scored by how plausible its non-ASCII output
/// looks, and the best score wins. windows-1252 wins ties, since short Latin text
/// often also decodes as valid double-byte CJK.
#[must_use]
pub fn detect(bytes: &[u8]) -> Detection {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return Detection {
            encoding,
            confidence: 1.0,
        };
    }

    if std::str::from_utf8(bytes).is_ok() {
        return Detection {
            encoding: UTF_8,
            confidence: 1.0,
        };
    }

    let mut best = Detection {
        encoding: UTF_8,
        confidence: 0.0,
    };

    for encoding in CJK_CANDIDATES {
        if let Some(text) = decode_strict(encoding, bytes) {
            let confidence = cjk_plausibility(&text);
            if confidence > best.confidence {
                best = Detection {
                    encoding,
                    confidence,
                };
            }
        }
    }

    if let Some(text) = decode_strict(WINDOWS_1252, bytes) {
        let confidence = latin_plausibility(&text);
        if confidence >= best.confidence {
            best = Detection {
                encoding: WINDOWS_1252,
                confidence,
            };
        }
    }

    best
}

/// Decode `bytes` using the detected encoding, or lossy UTF-8 when detection is
/// less confident than `min_confidence`.
#[must_use]
pub fn decode(bytes: &[u8], min_confidence: f32) -> (String, &'static Encoding) {
    let detection = detect(bytes);
    debug!(
        encoding = detection.encoding.name(),
        confidence = detection.confidence,
        "Detected text encoding"
    );

    let encoding = if detection.confidence < min_confidence {
        warn!(
            candidate = detection.encoding.name(),
            confidence = detection.confidence,
            "Low encoding detection confidence, falling back to UTF-8"
        );
        UTF_8
    } else {
        detection.encoding
    };

    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!(
            encoding = encoding.name(),
            "Input contained undecodable bytes; replaced with U+FFFD"
        );
    }

    (text.into_owned(), encoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_utf8() {
        let detection = detect(b"rust programming\n");
        assert_eq!(detection.encoding, UTF_8);
        assert!((detection.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn utf8_bom_is_stripped() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("検索\n".as_bytes());
        let (text, encoding) = decode(&bytes, 0.7);
        assert_eq!(encoding, UTF_8);
        assert_eq!(text, "検索\n");
    }

    #[test]
    fn detects_shift_jis() {
        let (bytes, _, _) = SHIFT_JIS.encode("検索キーワード\n日本語\n");
        let (text, encoding) = decode(&bytes, 0.7);
        assert_eq!(encoding, SHIFT_JIS);
        assert_eq!(text, "検索キーワード\n日本語\n");
    }

    #[test]
    fn detects_windows_1252() {
        let bytes = [b'c', b'a', b'f', 0xE9, b'\n'];
        let (text, encoding) = decode(&bytes, 0.7);
        assert_eq!(encoding, WINDOWS_1252);
        assert_eq!(text, "café\n");
    }

    #[test]
    fn accented_latin_is_not_misread_as_cjk() {
        let (bytes, _, _) = WINDOWS_1252.encode("Pokémon\n");
        let (text, encoding) = decode(&bytes, 0.7);
        assert_eq!(encoding, WINDOWS_1252);
        assert_eq!(text, "Pokémon\n");
    }

    #[test]
    fn several_accents_stay_latin() {
        let (bytes, _, _) = WINDOWS_1252.encode("crème brûlée\nPokémon\n");
        let (text, encoding) = decode(&bytes, 0.7);
        assert_eq!(encoding, WINDOWS_1252);
        assert_eq!(text, "crème brûlée\nPokémon\n");
    }

    #[test]
    fn wedged_cjk_scores_low() {
        assert!(cjk_plausibility("Pok駑on").abs() < f32::EPSILON);
        assert!((cjk_plausibility("Rust 入門") - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn low_confidence_falls_back_to_utf8() {
        let bytes = [b'a', b'b', b'c', 0x80, b'\n'];
        let (text, encoding) = decode(&bytes, 0.7);
        assert_eq!(encoding, UTF_8);
        assert_eq!(text, "abc\u{FFFD}\n");
    }
}
