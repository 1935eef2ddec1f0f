//! Small shared aliases, matching the collection/hasher/clock choices used
//! throughout this crate.

/// Fast, non-cryptographic hasher used for the hashcons and the per-class
/// `uses` bookkeeping. Iteration order over a plain `HashMap`/`HashSet` is
/// never relied upon; anywhere iteration order matters we reach for
/// [`indexmap::IndexMap`]/[`indexmap::IndexSet`] instead.
pub(crate) type BuildHasher = fxhash::FxBuildHasher;
pub(crate) type HashMap<K, V, B = BuildHasher> = std::collections::HashMap<K, V, B>;
pub(crate) type HashSet<K, B = BuildHasher> = std::collections::HashSet<K, B>;

/// Clock used by [`crate::run::Runner`] for its time-limit bookkeeping.
pub(crate) type Instant = quanta::Instant;
