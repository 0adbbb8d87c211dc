// Firmware version gate.
//
// The server advertises the offered image version in a response header;
// an update only proceeds when that version is strictly newer than the
// running one. Versions are dotted fields compared numerically where
// both sides are numeric, lexicographically otherwise, with missing
// fields reading as zero.

use std::cmp::Ordering;

/// Response header carrying the offered firmware version.
pub const VERSION_HEADER: &str = "X-Firmware-Version";

pub fn compare(a: &str, b: &str) -> Ordering {
    let mut left = a.trim().split('.');
    let mut right = b.trim().split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (l, r) => {
                let l = l.unwrap_or("0");
                let r = r.unwrap_or("0");
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(ln), Ok(rn)) => ln.cmp(&rn),
                    _ => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// True when the offered version should replace the current one.
pub fn is_newer(offered: &str, current: &str) -> bool {
    compare(offered, current) == Ordering::Greater
}
