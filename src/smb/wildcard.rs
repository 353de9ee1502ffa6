//! DOS wildcard matching.
//!
//! Two modes share one core matcher: the legacy 8.3 mode splits pattern and
//! name at the first dot and matches base and extension separately, while
//! the dotted mode used by TRANS2 long-name queries matches dot-separated
//! components pairwise. `*` backtracks, `?` is positional but a trailing
//! run of `?` tolerates a shorter name. Matching is case-insensitive.

/// Collapse redundant `**` and `*?` runs. They match the same strings as a
/// single `*` but would defeat the recursion bound below.
pub fn normalize_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if out.ends_with('*') && (c == '*' || c == '?') {
            continue;
        }
        out.push(c);
    }
    out
}

/// Core matcher over uppercased bytes. Depth is bounded by the pattern
/// length so hostile patterns cannot recurse without consuming pattern.
fn do_match(name: &[u8], pat: &[u8], depth: usize) -> bool {
    if depth == 0 {
        return false;
    }
    let mut n = 0;
    let mut p = 0;
    while p < pat.len() {
        match pat[p] {
            b'*' => {
                p += 1;
                if p == pat.len() {
                    return true;
                }
                while n <= name.len() {
                    if do_match(&name[n..], &pat[p..], depth - 1) {
                        return true;
                    }
                    n += 1;
                }
                return false;
            }
            b'?' => {
                if n == name.len() {
                    // A run of trailing wildcards is satisfied by nothing.
                    return pat[p..].iter().all(|&c| c == b'?' || c == b'*');
                }
                n += 1;
                p += 1;
            }
            lit => {
                if n == name.len() || name[n] != lit {
                    return false;
                }
                n += 1;
                p += 1;
            }
        }
    }
    n == name.len()
}

/// Patterns made purely of `*`, `?` and `.` are the only ones `.` and `..`
/// may match.
fn matches_everything(pat: &str) -> bool {
    !pat.is_empty() && pat.chars().all(|c| matches!(c, '*' | '?' | '.'))
}

/// Split at the first dot. A trailing dot means "no extension", which is
/// indistinguishable here from an absent one.
fn split_base_ext(s: &str) -> (&str, &str) {
    match s.find('.') {
        Some(i) => (&s[..i], &s[i + 1..]),
        None => (s, ""),
    }
}

fn legacy_match(name: &str, pat: &str) -> bool {
    let depth = pat.len() + 1;
    if !pat.contains('.') {
        // No extension part in the pattern: match against the whole name,
        // so `a*z` can span an arbitrary extension.
        return do_match(name.as_bytes(), pat.as_bytes(), depth);
    }
    let (nb, ne) = split_base_ext(name);
    let (pb, pe) = split_base_ext(pat);
    do_match(nb.as_bytes(), pb.as_bytes(), depth) && do_match(ne.as_bytes(), pe.as_bytes(), depth)
}

fn dotted_match(name: &str, pat: &str) -> bool {
    if !pat.contains('.') {
        return do_match(name.as_bytes(), pat.as_bytes(), pat.len() + 1);
    }
    let nc: Vec<&str> = name.split('.').collect();
    let pc: Vec<&str> = pat.split('.').collect();
    match_components(&nc, &pc)
}

fn match_components(nc: &[&str], pc: &[&str]) -> bool {
    let Some(p) = pc.first() else {
        return nc.is_empty();
    };
    if nc.is_empty() {
        // Leftover pattern components match nothing only if pure `*`.
        return pc.iter().all(|c| !c.is_empty() && c.bytes().all(|b| b == b'*'));
    }
    if !do_match(nc[0].as_bytes(), p.as_bytes(), p.len() + 1) {
        return false;
    }
    if match_components(&nc[1..], &pc[1..]) {
        return true;
    }
    if p.ends_with('*') {
        // The trailing `*` may absorb whole extra name components.
        for skip in 2..=nc.len() {
            if match_components(&nc[skip..], &pc[1..]) {
                return true;
            }
        }
    }
    false
}

/// Match `name` against a DOS pattern. `dotted` selects the TRANS2
/// long-name component semantics over the legacy 8.3 split.
pub fn mask_match(name: &str, pattern: &str, dotted: bool) -> bool {
    let pat = normalize_pattern(&pattern.to_uppercase());
    if pat.is_empty() {
        return false;
    }
    if name == "." || name == ".." {
        return matches_everything(&pat);
    }
    let name = name.to_uppercase();
    if dotted {
        dotted_match(&name, &pat)
    } else {
        legacy_match(&name, &pat)
    }
}
