//! Label vocabularies
//!
//! Bidirectional name <-> id tables for the two classifier heads. A [`LabelSet`]
//! is built once per run and handed to whichever component needs to encode
//! manifest rows or decode predictions.

use std::collections::HashMap;

use crate::utils::error::{FloraError, Result};

/// Species vocabulary, in id order
pub const SPECIES_NAMES: [&str; 16] = [
    "astilbe",
    "bellflower",
    "black_eyed_susan",
    "calendula",
    "california_poppy",
    "carnation",
    "common_daisy",
    "coreopsis",
    "daffodil",
    "dandelion",
    "iris",
    "magnolia",
    "rose",
    "sunflower",
    "tulip",
    "water_lily",
];

/// Color vocabulary, in id order
pub const COLOR_NAMES: [&str; 8] = [
    "white", "yellow", "orange", "pink", "red", "purple", "maroon", "brown",
];

/// Immutable name <-> id mapping for one head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    /// Table name used in error messages ("species" or "color")
    kind: &'static str,
    names: Vec<String>,
    ids: HashMap<String, usize>,
}

impl LabelTable {
    /// Build a table from an ordered vocabulary; position is the id
    pub fn new<S: AsRef<str>>(kind: &'static str, names: &[S]) -> Self {
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        let ids = names
            .iter()
            .enumerate()
            .map(|(id, name)| (name.clone(), id))
            .collect();

        Self { kind, names, ids }
    }

    /// The fixed 16-species table
    pub fn species() -> Self {
        Self::new("species", &SPECIES_NAMES)
    }

    /// The fixed 8-color table
    pub fn colors() -> Self {
        Self::new("color", &COLOR_NAMES)
    }

    /// Name -> id. Lookup is exact, after trimming surrounding whitespace.
    pub fn encode(&self, name: &str) -> Result<usize> {
        self.ids
            .get(name.trim())
            .copied()
            .ok_or_else(|| FloraError::UnknownLabel {
                table: self.kind,
                name: name.to_string(),
            })
    }

    /// Id -> name
    pub fn decode(&self, id: usize) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Both label tables for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    pub species: LabelTable,
    pub colors: LabelTable,
}

impl Default for LabelSet {
    fn default() -> Self {
        Self {
            species: LabelTable::species(),
            colors: LabelTable::colors(),
        }
    }
}

impl LabelSet {
    /// Build the fixed vocabularies, checking them against the configured head sizes
    pub fn for_heads(num_species: usize, num_colors: usize) -> Result<Self> {
        let set = Self::default();

        if set.species.len() != num_species {
            return Err(FloraError::Config(format!(
                "num_species is {} but the species vocabulary has {} names",
                num_species,
                set.species.len()
            )));
        }
        if set.colors.len() != num_colors {
            return Err(FloraError::Config(format!(
                "num_colors is {} but the color vocabulary has {} names",
                num_colors,
                set.colors.len()
            )));
        }

        Ok(set)
    }

    /// Decode a (species id, color id) pair
    pub fn decode_pair(&self, species: usize, color: usize) -> Result<(String, String)> {
        let species_name = self.species.decode(species).ok_or_else(|| {
            FloraError::Inference(format!("species id {} outside vocabulary", species))
        })?;
        let color_name = self.colors.decode(color).ok_or_else(|| {
            FloraError::Inference(format!("color id {} outside vocabulary", color))
        })?;

        Ok((species_name.to_string(), color_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_species_round_trip() {
        let table = LabelTable::species();
        assert_eq!(table.len(), 16);
        for name in SPECIES_NAMES {
            let id = table.encode(name).unwrap();
            assert_eq!(table.decode(id), Some(name));
        }
    }

    #[test]
    fn test_color_round_trip() {
        let table = LabelTable::colors();
        assert_eq!(table.len(), 8);
        for name in COLOR_NAMES {
            let id = table.encode(name).unwrap();
            assert_eq!(table.decode(id), Some(name));
        }
    }

    #[test]
    fn test_ids_follow_vocabulary_order() {
        let set = LabelSet::default();
        assert_eq!(set.species.encode("astilbe").unwrap(), 0);
        assert_eq!(set.species.encode("water_lily").unwrap(), 15);
        assert_eq!(set.colors.encode("brown").unwrap(), 7);
    }

    #[test]
    fn test_unknown_name() {
        let table = LabelTable::species();
        match table.encode("orchid") {
            Err(FloraError::UnknownLabel { table, name }) => {
                assert_eq!(table, "species");
                assert_eq!(name, "orchid");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(table.decode(16), None);
    }

    #[test]
    fn test_for_heads_rejects_mismatch() {
        assert!(LabelSet::for_heads(16, 8).is_ok());
        assert!(matches!(
            LabelSet::for_heads(38, 8),
            Err(FloraError::Config(_))
        ));
    }

    #[test]
    fn test_decode_pair() {
        let set = LabelSet::default();
        let (species, color) = set.decode_pair(12, 4).unwrap();
        assert_eq!(species, "rose");
        assert_eq!(color, "red");
        assert!(set.decode_pair(99, 0).is_err());
    }
}
