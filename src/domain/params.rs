//! Parameter vocabulary shared by all PDF models.
//!
//! Models expose only the subset that exists for their structure; the full slot
//! list is the namespace strategies are written against, and the source of
//! "did you mean" hints when a strategy names something unknown.

/// Profile-level parameters, in slot order.
pub const PROFILE_PARAMETERS: [&str; 5] = ["qdamp", "qbroad", "scale", "delta1", "delta2"];

/// Lattice parameters, in slot order.
pub const LATTICE_PARAMETERS: [&str; 6] = ["a", "b", "c", "alpha", "beta", "gamma"];

/// Per-atom parameter stems; the slot name is `<stem>_<atom index>`.
pub const ATOM_PARAMETER_STEMS: [&str; 10] = [
    "x", "y", "z", "Uiso", "U11", "U22", "U33", "U12", "U13", "U23",
];

pub const MAX_ATOMS: usize = 64;

/// Every parameter name a strategy may refer to, in slot order.
pub fn parameter_slots() -> Vec<String> {
    let mut names: Vec<String> = PROFILE_PARAMETERS
        .iter()
        .chain(LATTICE_PARAMETERS.iter())
        .map(|s| s.to_string())
        .collect();
    for atom in 0..MAX_ATOMS {
        for stem in ATOM_PARAMETER_STEMS {
            names.push(format!("{stem}_{atom}"));
        }
    }
    names
}

/// Whether `name` is one of `parameter_slots()`, without building the list.
pub fn is_parameter_slot(name: &str) -> bool {
    if PROFILE_PARAMETERS.contains(&name) || LATTICE_PARAMETERS.contains(&name) {
        return true;
    }
    let Some((stem, atom)) = name.rsplit_once('_') else {
        return false;
    };
    ATOM_PARAMETER_STEMS.contains(&stem)
        && !atom.starts_with('+')
        && atom.parse::<usize>().is_ok_and(|i| i < MAX_ATOMS)
}

/// Up to `limit` candidates similar to `name`, best first.
///
/// Similarity is `1 - distance / max_len` over the Levenshtein distance; only
/// candidates scoring at least 0.6 are returned.
pub fn close_matches<'a, I>(name: &str, candidates: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut scored: Vec<(f64, &str)> = candidates
        .into_iter()
        .filter_map(|c| {
            let longest = name.chars().count().max(c.chars().count());
            if longest == 0 {
                return None;
            }
            let score = 1.0 - levenshtein(name, c) as f64 / longest as f64;
            (score >= 0.6).then_some((score, c))
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(limit)
        .map(|(_, c)| c.to_string())
        .collect()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let subst = prev[j] + usize::from(ca != *cb);
            cur[j + 1] = subst.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}
