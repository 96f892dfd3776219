//! Plate format validation and fuzzy matching.
//!
//! Only six character Dutch plates are tracked. A reading is accepted when it fits one of
//! the known sidecodes, and two readings are considered the same physical plate when at
//! least [`MATCH_THRESHOLD`] of their positions hold the same character.

/// The exact number of characters a tracked plate has.
pub const PLATE_LENGTH: usize = 6;

/// How many equal positions make two readings the same plate.
pub const MATCH_THRESHOLD: usize = 4;

/// A positional layout: every position in `digits` must hold a decimal digit and every
/// position in `letters` must not.
#[derive(Debug, Clone, Copy)]
struct Layout {
    digits: &'static [usize],
    letters: &'static [usize],
}

impl Layout {
    const fn new(digits: &'static [usize], letters: &'static [usize]) -> Self {
        Self { digits, letters }
    }

    fn matches(&self, chars: &[char]) -> bool {
        self.digits.iter().all(|&i| chars[i].is_ascii_digit())
            && self.letters.iter().all(|&i| !chars[i].is_ascii_digit())
    }
}

const LAYOUTS: [Layout; 11] = [
    Layout::new(&[2, 3, 4, 5], &[0, 1]),    // XX-99-99
    Layout::new(&[0, 1, 2, 3], &[4, 5]),    // 99-99-XX
    Layout::new(&[0, 1, 4, 5], &[2, 3]),    // 99-XX-99
    Layout::new(&[2, 3], &[0, 1, 4, 5]),    // XX-99-XX
    Layout::new(&[4, 5], &[0, 1, 2, 3]),    // XX-XX-99
    Layout::new(&[0, 1], &[2, 3, 4, 5]),    // 99-XX-XX
    Layout::new(&[0, 1, 5], &[2, 3, 4]),    // 99-XXX-9
    Layout::new(&[0, 4, 5], &[1, 2, 3]),    // 9-XXX-99
    Layout::new(&[2, 3, 4], &[0, 1, 5]),    // XX-999-X
    Layout::new(&[1, 2, 3], &[0, 4, 5]),    // X-999-XX
    Layout::new(&[3, 4], &[0, 1, 2, 5]),    // XXX-99-X
];

/// Returns true when `plate` is [`PLATE_LENGTH`] characters long and fits at least one
/// known sidecode.
pub fn is_valid_format(plate: &str) -> bool {
    let chars: Vec<char> = plate.chars().collect();
    if chars.len() != PLATE_LENGTH {
        return false;
    }

    LAYOUTS.iter().any(|layout| layout.matches(&chars))
}

/// Count the positions where `a` and `b` hold the same character.
///
/// Returns 0 when either string is not exactly `length` characters long.
pub fn match_count(a: &str, b: &str, length: usize) -> usize {
    if a.chars().count() != length || b.chars().count() != length {
        return 0;
    }

    a.chars().zip(b.chars()).filter(|(x, y)| x == y).count()
}

/// Whether `a` and `b` are close enough to be readings of the same plate.
pub fn is_fuzzy_match(a: &str, b: &str) -> bool {
    match_count(a, b, PLATE_LENGTH) >= MATCH_THRESHOLD
}
