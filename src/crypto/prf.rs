use hmac::{Hmac, Mac};
use sha2::Sha256;
use tinyvec::ArrayVec;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Length of the master secret.
pub const MASTER_SECRET_LEN: usize = 48;

/// Length of the Finished verify data (full HMAC-SHA256 output).
pub const VERIFY_DATA_LEN: usize = 32;

/// PRF as specified in RFC 5246 Section 5, fixed to HMAC-SHA256.
///
/// PRF(secret, label, seed) = P_SHA256(secret, label + seed)
///
/// NOTE: The seed parameter here is the actual seed data WITHOUT the label.
pub fn prf(
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>, String> {
    let full_seed = compute_full_seed(label, seed)?;
    p_hash(secret, &full_seed, output_len)
}

fn compute_full_seed(label: &str, seed: &[u8]) -> Result<ArrayVec<[u8; 128]>, String> {
    if !label.is_ascii() {
        return Err(format!("PRF label not ascii: {}", label));
    }
    let mut full_seed: ArrayVec<[u8; 128]> = ArrayVec::default();
    if label.len() + seed.len() > full_seed.capacity() {
        return Err(format!("PRF seed too long: {}", label.len() + seed.len()));
    }
    full_seed.extend_from_slice(label.as_bytes());
    full_seed.extend_from_slice(seed);
    Ok(full_seed)
}

fn hmac(secret: &[u8]) -> Result<HmacSha256, String> {
    HmacSha256::new_from_slice(secret).map_err(|e| format!("HMAC key: {}", e))
}

fn p_hash(
    secret: &[u8],
    full_seed: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>, String> {
    let mut result = Zeroizing::new(Vec::with_capacity(output_len));

    // A(1) = HMAC_hash(secret, A(0)) where A(0) = seed
    let mut mac = hmac(secret)?;
    mac.update(full_seed);
    let mut a = mac.finalize().into_bytes();

    while result.len() < output_len {
        // HMAC_hash(secret, A(i) + seed)
        let mut mac = hmac(secret)?;
        mac.update(&a);
        mac.update(full_seed);
        let output = mac.finalize().into_bytes();

        let remaining = output_len - result.len();
        let to_copy = remaining.min(output.len());
        result.extend_from_slice(&output[..to_copy]);

        if result.len() < output_len {
            // A(i+1) = HMAC_hash(secret, A(i))
            let mut mac = hmac(secret)?;
            mac.update(&a);
            a = mac.finalize().into_bytes();
        }
    }

    Ok(result)
}

/// master_secret = PRF(shared_secret, "master secret", transcript_hash, 48)
pub fn master_secret(
    shared_secret: &[u8],
    transcript_hash: &[u8],
) -> Result<Zeroizing<Vec<u8>>, String> {
    prf(
        shared_secret,
        "master secret",
        transcript_hash,
        MASTER_SECRET_LEN,
    )
}

/// key_block = PRF(master_secret, "key expansion", server_random + client_random, len)
pub fn key_expansion(
    master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    key_material_length: usize,
) -> Result<Zeroizing<Vec<u8>>, String> {
    let mut seed: ArrayVec<[u8; 64]> = ArrayVec::default();
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);

    prf(master_secret, "key expansion", &seed, key_material_length)
}

/// verify_data = HMAC_SHA256(master_secret, label + transcript_hash)
pub fn finished(
    master_secret: &[u8],
    label: &str,
    transcript_hash: &[u8],
) -> Result<[u8; VERIFY_DATA_LEN], String> {
    let mut mac = hmac(master_secret)?;
    mac.update(label.as_bytes());
    mac.update(transcript_hash);
    Ok(mac.finalize().into_bytes().into())
}

/// Constant time check of received verify data.
pub fn verify_finished(
    master_secret: &[u8],
    label: &str,
    transcript_hash: &[u8],
    verify_data: &[u8],
) -> Result<(), String> {
    let mut mac = hmac(master_secret)?;
    mac.update(label.as_bytes());
    mac.update(transcript_hash);
    mac.verify_slice(verify_data)
        .map_err(|_| format!("{} verify data mismatch", label))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prf_rfc5246_test_vector() {
        // Well known P_SHA256 test vector (IETF TLS WG mailing list).
        let secret = [
            0x9b, 0xbe, 0x43, 0x6b, 0xa9, 0x40, 0xf0, 0x17, 0xb1, 0x76, 0x52, 0x84, 0x9a, 0x71,
            0xdb, 0x35,
        ];
        let seed = [
            0xa0, 0xba, 0x9f, 0x93, 0x6c, 0xda, 0x31, 0x18, 0x27, 0xa6, 0xf7, 0x96, 0xff, 0xd5,
            0x19, 0x8c,
        ];
        let out = prf(&secret, "test label", &seed, 100).unwrap();

        assert_eq!(out.len(), 100);
        assert_eq!(
            &out[..16],
            &[
                0xe3, 0xf2, 0x29, 0xba, 0x72, 0x7b, 0xe1, 0x7b, 0x8d, 0x12, 0x26, 0x20, 0x55,
                0x7c, 0xd4, 0x53
            ]
        );
    }

    #[test]
    fn finished_verifies_and_rejects() {
        let master = [7u8; MASTER_SECRET_LEN];
        let hash = [1u8; 32];
        let vd = finished(&master, "client finished", &hash).unwrap();

        verify_finished(&master, "client finished", &hash, &vd).unwrap();
        assert!(verify_finished(&master, "server finished", &hash, &vd).is_err());

        let mut bad = vd;
        bad[0] ^= 1;
        assert!(verify_finished(&master, "client finished", &hash, &bad).is_err());
    }

    #[test]
    fn seed_too_long_is_error() {
        assert!(prf(&[1], "label", &[0; 200], 16).is_err());
    }
}
