use std::iter;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Random alphanumeric string of `size` characters.
pub fn random_str(size: usize) -> String {
    let mut rng = thread_rng();
    let random_str: String = iter::repeat(())
        .map(|()| rng.sample(Alphanumeric))
        .map(char::from)
        .take(size)
        .collect();
    random_str
}

#[cfg(test)]
mod tests {
    use super::random_str;

    #[test]
    fn length_and_charset() {
        let s = random_str(12);
        assert_eq!(s.len(), 12);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
