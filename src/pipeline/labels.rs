use crate::types::ClassLabel;

// Class order the sign classifier was trained with.
static SIGN_LABELS: [&str; 28] = [
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R", "S",
    "T", "U", "V", "W", "X", "Y", "Z", "Hello", "Thank You",
];

/// Maps a classifier id to its label, falling back to [`ClassLabel::Unknown`].
pub fn resolve(class_id: i64) -> ClassLabel {
    usize::try_from(class_id)
        .ok()
        .and_then(|idx| SIGN_LABELS.get(idx).copied())
        .map(ClassLabel::Sign)
        .unwrap_or(ClassLabel::Unknown)
}
