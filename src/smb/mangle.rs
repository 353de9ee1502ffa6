//! Deterministic 8.3 short-name generation.
//!
//! `mangle` is a pure function: the alias is derived from a checksum of the
//! (uppercased) name, so every call agrees without a table of issued names.
//! Two distinct long names can collide; resumption code therefore always
//! compares mangled-against-mangled rather than trusting uniqueness.

const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Names DOS reserves for devices, extension stripped before comparison.
const RESERVED_NAMES: [&str; 11] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "LPT1", "LPT2", "LPT3",
];

fn is_dos_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_-!#$%&'()@^`{}~".contains(c)
}

fn is_reserved(base: &str) -> bool {
    RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(base))
}

/// True when `name` already has a legal 8.3 shape: at most one dot, base of
/// 1..=8 DOS-safe characters, extension of 0..=3, and not a reserved device
/// name.
pub fn is_8_3(name: &str) -> bool {
    if name == "." || name == ".." {
        return true;
    }
    if name.is_empty() || name.len() > 12 || name.matches('.').count() > 1 {
        return false;
    }
    let (base, ext) = match name.find('.') {
        Some(i) => (&name[..i], &name[i + 1..]),
        None => (name, ""),
    };
    if base.is_empty() || base.len() > 8 || ext.len() > 3 {
        return false;
    }
    if is_reserved(base) {
        return false;
    }
    base.chars().all(is_dos_char) && ext.chars().all(is_dos_char)
}

/// XOR-fold checksum with a 0..=14 bit rotation keyed by position.
fn checksum(s: &str) -> u32 {
    s.bytes()
        .enumerate()
        .fold(0u32, |acc, (i, b)| acc ^ ((b as u32) << (i % 15)))
}

/// Derive the 8.3 alias for `name`: up to five DOS-safe base characters, a
/// tilde, two base-36 checksum digits, then up to three DOS-safe extension
/// characters. Unsafe characters are skipped, not replaced.
pub fn mangle(name: &str) -> String {
    let upper = name.to_uppercase();
    let (base, ext) = match upper.rfind('.') {
        Some(i) => (&upper[..i], &upper[i + 1..]),
        None => (upper.as_str(), ""),
    };

    // A short, safe extension survives mangling, so checksum the base alone
    // to keep names differing only by extension apart.
    let safe_ext = !ext.is_empty() && ext.len() <= 3 && ext.chars().all(is_dos_char);
    let csum = if safe_ext {
        checksum(base) % 1296
    } else {
        checksum(&upper) % 1296
    };

    let mut out = String::with_capacity(12);
    out.extend(base.chars().filter(|c| is_dos_char(*c)).take(5));
    out.push('~');
    out.push(BASE36[(csum / 36) as usize] as char);
    out.push(BASE36[(csum % 36) as usize] as char);
    if !ext.is_empty() {
        out.push('.');
        out.extend(ext.chars().filter(|c| is_dos_char(*c)).take(3));
    }
    out
}

/// The name a client sees: already-short names pass through uppercased,
/// long names get their mangled alias.
pub fn short_form(name: &str) -> String {
    if is_8_3(name) {
        name.to_uppercase()
    } else {
        mangle(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_are_accepted() {
        for n in ["README.TXT", "A", "FOO_BAR.C", "12345678.123", ".", ".."] {
            assert!(is_8_3(n), "{n}");
        }
    }

    #[test]
    fn long_or_unsafe_names_are_rejected() {
        for n in [
            "averylongfilename.txt",
            "two.dots.txt",
            "123456789",
            "a.fours",
            "sp ace.txt",
            "",
        ] {
            assert!(!is_8_3(n), "{n}");
        }
    }

    #[test]
    fn reserved_device_names_are_rejected() {
        for n in ["CON", "con.txt", "Aux", "COM1.DAT", "lpt3"] {
            assert!(!is_8_3(n), "{n}");
        }
        assert!(is_8_3("CONX"));
    }

    #[test]
    fn mangle_is_deterministic_and_short() {
        for n in [
            "averylongfilename.txt",
            "hello world.document",
            "ALLCAPS_BUT_LONG",
            "weird..name",
            "ünïcode.täxt",
        ] {
            let m = mangle(n);
            assert_eq!(m, mangle(n), "{n}");
            assert!(is_8_3(&m), "{n} -> {m}");
            assert!(m.contains('~'), "{n} -> {m}");
        }
    }

    #[test]
    fn mangle_is_case_stable() {
        assert_eq!(mangle("LongFileName.txt"), mangle("longfilename.TXT"));
    }

    #[test]
    fn safe_extension_names_differ_by_base_only() {
        // Same base, different safe extensions: same checksum, so the
        // aliases differ only in the extension part.
        let a = mangle("longbasename.txt");
        let b = mangle("longbasename.doc");
        assert_eq!(a.split('.').next(), b.split('.').next());
        assert!(a.ends_with(".TXT"));
        assert!(b.ends_with(".DOC"));
    }

    #[test]
    fn unsafe_characters_are_skipped() {
        let m = mangle("a b c d e f g.txt");
        let base = m.split('.').next().unwrap();
        // Spaces are dropped, not substituted.
        assert!(base.starts_with("ABCDE"));
    }

    #[test]
    fn short_form_passes_through_8_3_names() {
        assert_eq!(short_form("readme.txt"), "README.TXT");
        assert_ne!(short_form("averylongname.txt"), "AVERYLONGNAME.TXT");
    }
}
