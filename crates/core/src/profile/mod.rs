use serde::Serialize;

use crate::{EngineError, Result};

/// Shelf or peak band settings. Gains are in dB, frequencies in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShelfBand {
    pub gain: f32,
    pub frequency: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeakBand {
    pub gain: f32,
    pub frequency: f32,
    pub q: f32,
}

/// DSP parameter preset for one genre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenreProfile {
    pub genre: &'static str,
    pub bass: ShelfBand,
    pub mids: PeakBand,
    pub highs: ShelfBand,
    /// Stereo width in [0, 1]; drives the second Haas delay.
    pub spatial_width: f32,
    /// Early reflection amount in [0, 1].
    pub spatial_depth: f32,
    /// Harmonic exciter amount in [0, 1].
    pub harmonic_excitement: f32,
    pub compression_ratio: f32,
    /// Compressor attack in seconds.
    pub attack: f32,
    /// Compressor release in seconds.
    pub release: f32,
}

const fn profile(
    genre: &'static str,
    bass: (f32, f32),
    mids: (f32, f32, f32),
    highs: (f32, f32),
    spatial: (f32, f32, f32),
    dynamics: (f32, f32, f32),
) -> GenreProfile {
    GenreProfile {
        genre,
        bass: ShelfBand {
            gain: bass.0,
            frequency: bass.1,
        },
        mids: PeakBand {
            gain: mids.0,
            frequency: mids.1,
            q: mids.2,
        },
        highs: ShelfBand {
            gain: highs.0,
            frequency: highs.1,
        },
        spatial_width: spatial.0,
        spatial_depth: spatial.1,
        harmonic_excitement: spatial.2,
        compression_ratio: dynamics.0,
        attack: dynamics.1,
        release: dynamics.2,
    }
}

#[rustfmt::skip]
//                 genre         bass (dB, Hz)   mids (dB, Hz, Q)      highs (dB, Hz)   width, depth, excite   ratio, attack, release
static BUILTIN: [GenreProfile; 12] = [
    profile("afro", (3.5, 80.0), (1.0, 1_200.0, 1.0), (2.0, 8_000.0), (0.85, 0.40, 0.35), (3.5, 0.005, 0.20)),
    profile("amapiano", (5.0, 60.0), (-1.0, 900.0, 0.9), (1.5, 9_000.0), (0.80, 0.45, 0.30), (4.0, 0.004, 0.25)),
    profile("dancehall", (4.5, 70.0), (0.5, 1_000.0, 1.1), (2.5, 7_500.0), (0.75, 0.35, 0.40), (4.5, 0.003, 0.18)),
    profile("trap", (4.0, 55.0), (-1.5, 1_500.0, 1.2), (3.0, 10_000.0), (0.80, 0.30, 0.45), (5.0, 0.002, 0.15)),
    profile("hiphop", (3.0, 75.0), (0.0, 1_100.0, 1.0), (1.5, 8_500.0), (0.60, 0.30, 0.30), (4.0, 0.004, 0.20)),
    profile("rnb", (2.5, 90.0), (1.5, 1_800.0, 0.8), (1.0, 9_500.0), (0.70, 0.50, 0.25), (3.0, 0.008, 0.30)),
    profile("reggae", (4.0, 70.0), (0.5, 800.0, 1.0), (1.0, 7_000.0), (0.65, 0.50, 0.20), (3.0, 0.006, 0.25)),
    profile("pop", (2.0, 100.0), (1.0, 2_000.0, 1.0), (2.0, 10_000.0), (0.60, 0.30, 0.30), (3.0, 0.005, 0.20)),
    profile("electronic", (4.0, 60.0), (-0.5, 1_200.0, 1.2), (3.5, 12_000.0), (0.90, 0.40, 0.50), (5.0, 0.002, 0.12)),
    profile("rock", (2.5, 100.0), (2.0, 2_500.0, 1.1), (2.5, 8_000.0), (0.55, 0.25, 0.50), (4.0, 0.003, 0.15)),
    profile("jazz", (1.0, 120.0), (0.5, 1_500.0, 0.7), (1.5, 9_000.0), (0.50, 0.60, 0.10), (2.0, 0.010, 0.35)),
    profile("gospel", (2.0, 90.0), (2.0, 1_600.0, 0.9), (1.5, 8_500.0), (0.70, 0.55, 0.20), (3.0, 0.006, 0.30)),
];

/// Immutable lookup table of genre presets.
#[derive(Debug, Clone, Copy)]
pub struct GenreProfileStore {
    profiles: &'static [GenreProfile],
}

impl GenreProfileStore {
    pub fn builtin() -> Self {
        Self {
            profiles: &BUILTIN,
        }
    }

    /// Case-insensitive lookup. Surrounding whitespace is ignored.
    pub fn get(&self, genre: &str) -> Option<&'static GenreProfile> {
        let genre = genre.trim();
        self.profiles
            .iter()
            .find(|profile| profile.genre.eq_ignore_ascii_case(genre))
    }

    /// Like [`get`](Self::get) but reports a missing tag as
    /// [`EngineError::AutomationTargetInvalid`].
    pub fn require(&self, genre: &str) -> Result<&'static GenreProfile> {
        self.get(genre)
            .ok_or_else(|| EngineError::AutomationTargetInvalid {
                genre: genre.to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static GenreProfile> {
        let profiles: &'static [GenreProfile] = self.profiles;
        profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl Default for GenreProfileStore {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_case_insensitively() {
        let store = GenreProfileStore::builtin();
        let afro = store.get("  AFRO ").unwrap();
        assert_eq!(afro.bass.gain, 3.5);
        assert_eq!(afro.spatial_width, 0.85);
        assert_eq!(store.get("trap").unwrap().bass.gain, 4.0);
        assert_eq!(store.get("dancehall").unwrap().compression_ratio, 4.5);
    }

    #[test]
    fn unknown_genre_is_an_invalid_target() {
        let store = GenreProfileStore::builtin();
        assert!(store.get("polka").is_none());
        assert!(matches!(
            store.require("polka"),
            Err(EngineError::AutomationTargetInvalid { genre }) if genre == "polka"
        ));
    }

    #[test]
    fn normalised_fields_stay_in_unit_range() {
        for profile in GenreProfileStore::builtin().iter() {
            for value in [
                profile.spatial_width,
                profile.spatial_depth,
                profile.harmonic_excitement,
            ] {
                assert!((0.0..=1.0).contains(&value), "{}", profile.genre);
            }
            assert!(profile.compression_ratio >= 1.0);
            assert!(profile.attack > 0.0 && profile.release > 0.0);
        }
    }

    #[test]
    fn genre_tags_are_unique() {
        let store = GenreProfileStore::builtin();
        let mut tags: Vec<_> = store.iter().map(|profile| profile.genre).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), store.len());
    }
}
