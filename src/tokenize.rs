//! IPA string → token ids for the ONNX graph.
//!
//! The symbol table is fixed by the pretrained weights: a pad symbol, then
//! punctuation, ASCII letters and IPA letters, each at its list index.
//! Characters outside the table are dropped.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

const PAD: char = '$';
const PUNCTUATION: &str = ";:,.!?¡¿—…\u{201C}«»\u{201D}\" ";
const LETTERS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const IPA_LETTERS: &str =
    "ɑɐɒæɓʙβɔɕçɗɖðʤəɘɚɛɜɝɞɟʄɡɠɢʛɦɧħɥʜɨɪʝɭɬɫɮʟɱɯɰŋɳɲɴøɵɸθœɶʘɹɺɾɻʀʁɽʂʃʈʧʉʊʋⱱʌɣɤʍχʎʏʑʐʒʔʡʕʢǀǁǂǃˈˌːˑʼʴʰʱʲʷˠˤ˞↓↑→↗↘\u{2019}\u{0329}\u{2018}ᵻ";

static SYMBOLS: Lazy<HashMap<char, i64>> = Lazy::new(|| {
    std::iter::once(PAD)
        .chain(PUNCTUATION.chars())
        .chain(LETTERS.chars())
        .chain(IPA_LETTERS.chars())
        .zip(0i64..)
        .collect()
});

/// Words and single punctuation marks.
static RE_PIECES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+|[^\w\s]").unwrap());

/// Token ids for an IPA string, wrapped in pad tokens (0).
pub fn encode(ipa: &str) -> Vec<i64> {
    let spaced = RE_PIECES
        .find_iter(ipa)
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let mut ids = Vec::with_capacity(spaced.len() + 2);
    ids.push(0);
    ids.extend(spaced.chars().filter_map(|c| SYMBOLS.get(&c).copied()));
    ids.push(0);
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_is_zero_and_ids_unique() {
        assert_eq!(SYMBOLS[&'$'], 0);
        let mut ids: Vec<i64> = SYMBOLS.values().copied().collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), SYMBOLS.len());
    }

    #[test]
    fn test_encode_wraps_with_pads() {
        let ids = encode("hɛloʊ");
        assert_eq!(ids.first(), Some(&0));
        assert_eq!(ids.last(), Some(&0));
        assert_eq!(ids.len(), 2 + 5);
    }

    #[test]
    fn test_punctuation_is_split_off() {
        // "wɜːld!" → "wɜːld !" : the space and '!' are both symbols.
        let ids = encode("wɜːld!");
        assert_eq!(ids[ids.len() - 2], SYMBOLS[&'!']);
        assert_eq!(ids[ids.len() - 3], SYMBOLS[&' ']);
    }

    #[test]
    fn test_unknown_characters_dropped() {
        assert_eq!(encode("中"), vec![0, 0]);
        assert_eq!(encode(""), vec![0, 0]);
    }
}
