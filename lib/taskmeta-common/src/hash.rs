//! Hashing helpers.

/// [`BuildHasher`][std::hash::BuildHasher] implementation for a fast, non-cryptographic hash that is optimized for
/// quality.
///
/// Suitable for hash tables keyed by short identifiers, such as container IDs. Currently, [`foldhash`][foldhash] is
/// used as the underlying implementation.
///
/// [foldhash]: http://github.com/orlp/foldhash
pub type FastBuildHasher = foldhash::quality::RandomState;
