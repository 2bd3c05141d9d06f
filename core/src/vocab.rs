//! Bidirectional word ↔ identifier table.
//!
//! Words are interned while a model is being loaded (`VocabBuilder`), then
//! frozen into a `Vocabulary` whose string index is an FST map from word
//! bytes to identifier. Identifier 0 is always the out-of-vocabulary token.
use ahash::AHashMap;
use fst::{Map, MapBuilder};

use crate::error::{LmError, LmResult};

/// Word identifier. Dense, starting at 0.
pub type WordId = u32;

/// Identifier of the out-of-vocabulary token.
pub const OOV_ID: WordId = 0;

/// Returned by id lookups for words the vocabulary does not contain.
pub const INVALID_ID: WordId = WordId::MAX;

/// Mutable vocabulary used by loaders. Ids follow first-seen order.
#[derive(Debug, Clone)]
pub struct VocabBuilder {
    words: Vec<String>,
    ids: AHashMap<String, WordId>,
}

impl VocabBuilder {
    /// Start a vocabulary whose id 0 is `oov`.
    pub fn new(oov: &str) -> Self {
        let mut builder = Self {
            words: Vec::new(),
            ids: AHashMap::new(),
        };
        builder.intern(oov);
        builder
    }

    /// Reserve room for `additional` more words.
    pub fn reserve(&mut self, additional: usize) {
        self.words.reserve(additional);
        self.ids.reserve(additional);
    }

    /// Return the id of `word`, assigning the next free id if it is new.
    pub fn intern(&mut self, word: &str) -> WordId {
        if let Some(&id) = self.ids.get(word) {
            return id;
        }
        let id = self.words.len() as WordId;
        self.words.push(word.to_string());
        self.ids.insert(word.to_string(), id);
        id
    }

    /// Id of an already-interned word.
    pub fn get(&self, word: &str) -> Option<WordId> {
        self.ids.get(word).copied()
    }

    /// Word string for an interned id.
    pub fn word(&self, id: WordId) -> Option<&str> {
        self.words.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Freeze into an immutable `Vocabulary`.
    pub fn finish(self) -> LmResult<Vocabulary> {
        Vocabulary::from_words(self.words)
    }
}

/// Frozen vocabulary. Index = identifier.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    words: Vec<String>,
    index: Map<Vec<u8>>,
}

impl Vocabulary {
    /// Build from an ordered word list; `words[0]` is the OOV token.
    ///
    /// Fails with `LmError::Format` on an empty list or a repeated word.
    pub fn from_words(words: Vec<String>) -> LmResult<Self> {
        if words.is_empty() {
            return Err(LmError::format("vocabulary has no OOV entry"));
        }

        let mut sorted: Vec<(&[u8], u64)> = words
            .iter()
            .enumerate()
            .map(|(id, w)| (w.as_bytes(), id as u64))
            .collect();
        sorted.sort_unstable();
        if let Some(pair) = sorted.windows(2).find(|p| p[0].0 == p[1].0) {
            return Err(LmError::format(format!(
                "duplicate word in vocabulary: {}",
                String::from_utf8_lossy(pair[0].0)
            )));
        }

        let mut builder = MapBuilder::memory();
        for (key, id) in sorted {
            builder
                .insert(key, id)
                .map_err(|e| LmError::format(format!("vocabulary index: {}", e)))?;
        }
        let bytes = builder
            .into_inner()
            .map_err(|e| LmError::format(format!("vocabulary index: {}", e)))?;
        let index = Map::new(bytes)
            .map_err(|e| LmError::format(format!("vocabulary index: {}", e)))?;

        Ok(Self { words, index })
    }

    /// Identifier of `word`, if present.
    pub fn get(&self, word: &str) -> Option<WordId> {
        self.index.get(word).map(|id| id as WordId)
    }

    /// Identifier of `word`, or [`INVALID_ID`]. Never fails.
    pub fn id_of(&self, word: &str) -> WordId {
        self.get(word).unwrap_or(INVALID_ID)
    }

    /// Word string for `id`; `None` when out of range.
    pub fn word(&self, id: WordId) -> Option<&str> {
        self.words.get(id as usize).map(String::as_str)
    }

    /// The out-of-vocabulary token (id 0).
    pub fn oov(&self) -> &str {
        &self.words[OOV_ID as usize]
    }

    pub fn contains_id(&self, id: WordId) -> bool {
        (id as usize) < self.words.len()
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Words in id order.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.words.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oov_is_always_id_zero() {
        let b = VocabBuilder::new("<UNK>");
        let v = b.finish().unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v.get("<UNK>"), Some(OOV_ID));
        assert_eq!(v.oov(), "<UNK>");
    }

    #[test]
    fn intern_keeps_first_seen_order() {
        let mut b = VocabBuilder::new("<UNK>");
        assert_eq!(b.intern("zebra"), 1);
        assert_eq!(b.intern("apple"), 2);
        assert_eq!(b.intern("zebra"), 1);
        assert_eq!(b.intern("<UNK>"), 0);
        let v = b.finish().unwrap();
        assert_eq!(v.word(1), Some("zebra"));
        assert_eq!(v.word(2), Some("apple"));
        assert_eq!(v.get("apple"), Some(2));
    }

    #[test]
    fn missing_words_are_not_errors() {
        let v = Vocabulary::from_words(vec!["<UNK>".into(), "a".into()]).unwrap();
        assert_eq!(v.get("b"), None);
        assert_eq!(v.id_of("b"), INVALID_ID);
        assert_eq!(v.word(2), None);
        assert_eq!(v.word(INVALID_ID), None);
    }

    #[test]
    fn ids_round_trip_through_words() {
        let words: Vec<String> = ["<UNK>", "<s>", "</s>", "b", "a", "ab", ""]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let v = Vocabulary::from_words(words).unwrap();
        for id in 0..v.len() as WordId {
            assert_eq!(v.id_of(v.word(id).unwrap()), id);
        }
    }

    #[test]
    fn rejects_duplicates_and_empty_lists() {
        assert!(Vocabulary::from_words(vec![]).is_err());
        let dup = vec!["<UNK>".to_string(), "x".to_string(), "x".to_string()];
        assert!(matches!(
            Vocabulary::from_words(dup),
            Err(LmError::Format(_))
        ));
    }
}
