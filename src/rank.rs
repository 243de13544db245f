//! Aggregation and ranking of raw vault results.
//!
//! Notes are merged by `basename`: every extra match of the same note
//! (another vault, another candidate query) adds its score to the merged
//! note. More ways to match means more relevant. The merged list is then
//! thresholded, sorted and capped according to [`Settings`].

use std::collections::HashMap;

use crate::models::{Note, Settings, Vault};

/// Output of [`aggregate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranked {
    /// Merged notes, before filtering, in first-seen order.
    pub raw_notes: Vec<Note>,
    /// Filtered, sorted and capped notes.
    pub notes: Vec<Note>,
    pub errors: Vec<Vault>,
}

/// Merges notes sharing a basename by summing their scores.
///
/// The merged note keeps the position of the first occurrence; every other
/// field comes from the last occurrence.
pub fn merge_by_basename(notes: Vec<Note>) -> Vec<Note> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<Note> = Vec::with_capacity(notes.len());

    for note in notes {
        match index.get(&note.basename) {
            Some(&i) => {
                let score = merged[i].score + note.score;
                merged[i] = Note { score, ..note };
            }
            None => {
                index.insert(note.basename.clone(), merged.len());
                merged.push(note);
            }
        }
    }
    merged
}

/// Keeps notes scoring strictly above `settings.notes_score`, sorts them by
/// descending score (stable, so ties keep merge order) and truncates to
/// `settings.notes_shown`.
pub fn rank(merged: &[Note], settings: &Settings) -> Vec<Note> {
    let mut notes: Vec<Note> = merged
        .iter()
        .filter(|n| n.score > settings.notes_score)
        .cloned()
        .collect();

    notes.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    notes.truncate(settings.notes_shown);
    notes
}

pub fn aggregate(raw: Vec<Note>, errors: Vec<Vault>, settings: &Settings) -> Ranked {
    let raw_notes = merge_by_basename(raw);
    let notes = rank(&raw_notes, settings);
    Ranked {
        raw_notes,
        notes,
        errors,
    }
}
