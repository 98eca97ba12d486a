//! Textbook RSA over `num-bigint`.
//!
//! Keys are generated from two random primes of `modulus_size / 2` bits with
//! public exponent 65537. Signatures are the SHA-256 digest of the message
//! raised to the private exponent, computed with the CRT. There is no padding:
//! this is demo-grade cryptography.

use crate::error::{BlockchainError, Result};
use crate::utils::{sha256_digest, sha256_hex};
use data_encoding::HEXLOWER;
use num_bigint::{BigInt, BigUint, RandBigInt};
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const PUBLIC_EXPONENT: u32 = 65537;
pub const MIN_MODULUS_SIZE: usize = 384;

const MILLER_RABIN_ROUNDS: usize = 24;
const MAX_KEYGEN_ATTEMPTS: usize = 64;
const SMALL_PRIMES: [u32; 24] = [
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];

pub const PUBLIC_KEY_FILE: &str = "cerocoin_key_pub.toml";
pub const PRIVATE_KEY_FILE: &str = "cerocoin_key_priv.toml";

/// RSA public key. Modulus and exponent are stored big-endian so the key can
/// travel inside coins, transactions and handshakes.
#[derive(
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct PublicKey {
    modulus: Vec<u8>,
    exponent: Vec<u8>,
}

impl PublicKey {
    fn from_parts(modulus: &BigUint, exponent: &BigUint) -> PublicKey {
        PublicKey {
            modulus: modulus.to_bytes_be(),
            exponent: exponent.to_bytes_be(),
        }
    }

    pub fn modulus(&self) -> BigUint {
        BigUint::from_bytes_be(&self.modulus)
    }

    pub fn exponent(&self) -> BigUint {
        BigUint::from_bytes_be(&self.exponent)
    }

    pub fn modulus_bits(&self) -> u64 {
        self.modulus().bits()
    }

    /// Canonical byte form, used in hash preimages and signed contents.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + self.modulus.len() + self.exponent.len());
        bytes.extend((self.modulus.len() as u32).to_be_bytes());
        bytes.extend(&self.modulus);
        bytes.extend((self.exponent.len() as u32).to_be_bytes());
        bytes.extend(&self.exponent);
        bytes
    }

    /// Node id: hex SHA-256 of the public key.
    pub fn node_id(&self) -> String {
        sha256_hex(&self.to_bytes())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.node_id();
        write!(f, "PublicKey({}..)", &id[..12])
    }
}

/// RSA private key with the CRT components used for signing.
#[derive(Clone)]
pub struct PrivateKey {
    modulus: BigUint,
    private_exponent: BigUint,
    p: BigUint,
    q: BigUint,
    dp: BigUint,
    dq: BigUint,
    q_inv: BigUint,
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({} bits)", self.modulus.bits())
    }
}

pub fn generate_keypair(modulus_size: usize) -> Result<(PublicKey, PrivateKey)> {
    if modulus_size % 2 != 0 {
        return Err(BlockchainError::Crypto(format!(
            "Modulus size must be even, got {modulus_size}"
        )));
    }
    if modulus_size < MIN_MODULUS_SIZE {
        return Err(BlockchainError::Crypto(format!(
            "Modulus size must be at least {MIN_MODULUS_SIZE} bits, got {modulus_size}"
        )));
    }

    let prime_size = (modulus_size / 2) as u64;
    let e = BigUint::from(PUBLIC_EXPONENT);

    for _ in 0..MAX_KEYGEN_ATTEMPTS {
        let p = generate_prime(prime_size);
        let q = generate_prime(prime_size);
        if p == q {
            continue;
        }
        let p1 = &p - 1u32;
        let q1 = &q - 1u32;
        let totient = &p1 * &q1;
        let Some(d) = mod_inverse(&e, &totient) else {
            continue;
        };
        let Some(q_inv) = mod_inverse(&q, &p) else {
            continue;
        };
        let modulus = &p * &q;
        if modulus.bits() != modulus_size as u64 {
            continue;
        }

        let public = PublicKey::from_parts(&modulus, &e);
        let private = PrivateKey {
            dp: &d % &p1,
            dq: &d % &q1,
            modulus,
            private_exponent: d,
            p,
            q,
            q_inv,
        };
        return Ok((public, private));
    }

    Err(BlockchainError::Crypto(format!(
        "Failed to generate a {modulus_size}-bit key pair"
    )))
}

/// Sign the SHA-256 digest of `data`.
pub fn sign(data: &[u8], key: &PrivateKey) -> Vec<u8> {
    let m = BigUint::from_bytes_be(&sha256_digest(data)) % &key.modulus;
    let m1 = m.modpow(&key.dp, &key.p);
    let m2 = m.modpow(&key.dq, &key.q);
    let diff = (&m1 + &key.p - (&m2 % &key.p)) % &key.p;
    let h = (&key.q_inv * diff) % &key.p;
    let s = m2 + h * &key.q;
    s.to_bytes_be()
}

pub fn verify(data: &[u8], signature: &[u8], key: &PublicKey) -> bool {
    let n = key.modulus();
    if n.is_zero() || signature.is_empty() {
        return false;
    }
    let s = BigUint::from_bytes_be(signature);
    if s >= n {
        return false;
    }
    let m = BigUint::from_bytes_be(&sha256_digest(data)) % &n;
    s.modpow(&key.exponent(), &n) == m
}

fn generate_prime(bits: u64) -> BigUint {
    let mut rng = rand::thread_rng();
    loop {
        let mut candidate = rng.gen_biguint(bits);
        // top two bits set so p * q has the full modulus size; low bit set for odd
        candidate |= BigUint::one() << (bits - 1);
        candidate |= BigUint::one() << (bits - 2);
        candidate |= BigUint::one();
        if is_probable_prime(&candidate) {
            return candidate;
        }
    }
}

fn is_probable_prime(n: &BigUint) -> bool {
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    for small in SMALL_PRIMES {
        let small = BigUint::from(small);
        if *n == small {
            return true;
        }
        if (n % &small).is_zero() {
            return false;
        }
    }
    if (n % &two).is_zero() {
        return false;
    }

    let n_minus_one = n - 1u32;
    let mut d = n_minus_one.clone();
    let mut s = 0u32;
    while (&d % &two).is_zero() {
        d >>= 1;
        s += 1;
    }

    let mut rng = rand::thread_rng();
    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let modulus = BigInt::from(m.clone());
    let (mut old_r, mut r) = (BigInt::from(a.clone()), modulus.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
    while !r.is_zero() {
        let quotient = &old_r / &r;
        let next_r = &old_r - &quotient * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &quotient * &s;
        old_s = std::mem::replace(&mut s, next_s);
    }
    if !old_r.is_one() {
        return None;
    }
    (((old_s % &modulus) + &modulus) % &modulus).to_biguint()
}

#[derive(Serialize, Deserialize)]
struct PublicKeyFile {
    modulus: String,
    public_exponent: String,
    node_id: String,
}

#[derive(Serialize, Deserialize)]
struct PrivateKeyFile {
    modulus: String,
    public_exponent: String,
    private_exponent: String,
    prime1: String,
    prime2: String,
}

fn hex(value: &BigUint) -> String {
    HEXLOWER.encode(&value.to_bytes_be())
}

/// Write the key pair as two TOML files under `dir`. Returns the paths written.
pub fn write_key_files(
    dir: &Path,
    public: &PublicKey,
    private: &PrivateKey,
) -> Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(dir)?;

    let public_file = PublicKeyFile {
        modulus: hex(&public.modulus()),
        public_exponent: hex(&public.exponent()),
        node_id: public.node_id(),
    };
    let private_file = PrivateKeyFile {
        modulus: hex(&private.modulus),
        public_exponent: hex(&public.exponent()),
        private_exponent: hex(&private.private_exponent),
        prime1: hex(&private.p),
        prime2: hex(&private.q),
    };

    let public_path = dir.join(PUBLIC_KEY_FILE);
    let private_path = dir.join(PRIVATE_KEY_FILE);
    let public_toml = toml::to_string(&public_file)
        .map_err(|e| BlockchainError::Serialization(format!("Failed to encode public key: {e}")))?;
    let private_toml = toml::to_string(&private_file)
        .map_err(|e| BlockchainError::Serialization(format!("Failed to encode private key: {e}")))?;
    fs::write(&public_path, public_toml)?;
    fs::write(&private_path, private_toml)?;

    Ok((public_path, private_path))
}
