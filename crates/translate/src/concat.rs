use sha2::{Digest, Sha256};

/// Hex digits of the SHA-256 fingerprint kept in shortened names.
pub const HASH_LEN: usize = 10;

/// Join `head` and `tail`, shortening to at most `max_len` bytes.
///
/// When the joined name fits it is returned unchanged. Otherwise the result is
/// `<head prefix>-<hash><tail>`, where the hash covers the full joined name and
/// `tail` is copied verbatim. If `tail` alone leaves no room for the hash, its
/// leading bytes are dropped instead.
pub fn safe_concat(head: &str, tail: &str, max_len: usize) -> String {
    let full = format!("{}{}", head, tail);
    if full.len() <= max_len {
        return full;
    }

    let digest = hex::encode(Sha256::digest(full.as_bytes()));
    let hash = &digest[..HASH_LEN];

    let budget = max_len.saturating_sub(HASH_LEN);
    if tail.len() > budget {
        let mut cut = tail.len() - budget;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        return format!("{}{}", hash, &tail[cut..]);
    }

    // one byte for the dash between prefix and hash
    let mut keep = (budget - tail.len()).saturating_sub(1).min(head.len());
    while !head.is_char_boundary(keep) {
        keep -= 1;
    }
    let prefix = head[..keep].trim_end_matches('-');
    if prefix.is_empty() {
        format!("{}{}", hash, tail)
    } else {
        format!("{}-{}{}", prefix, hash, tail)
    }
}
