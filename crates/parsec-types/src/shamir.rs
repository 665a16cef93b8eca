// Shamir secret sharing over the Ed25519 scalar field
//
// The secret is split into 31-byte chunks, each encoded as a scalar and shared
// through its own random polynomial. A share carries the evaluation of every
// chunk polynomial at the same x coordinate.

use curve25519_dalek::scalar::Scalar;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

const CHUNK_SIZE: usize = 31;

/// Error raised while splitting or recovering a secret
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShamirError {
    /// Threshold must be at least 1 and at most the number of shares
    #[error("Invalid threshold {threshold} for {shares} shares")]
    InvalidThreshold {
        /// Requested threshold
        threshold: usize,
        /// Requested number of shares
        shares: usize,
    },
    /// At most 255 shares can be generated
    #[error("Too many shares")]
    TooManyShares,
    /// Fewer distinct shares than the threshold were provided
    #[error("Not enough shares to recover the secret")]
    NotEnoughShares,
    /// Shares are inconsistent with each other
    #[error("Shares do not recover a valid secret")]
    CorruptedSecret,
}

/// Polynomial f(x) = a_0 + a_1*x + ... + a_{t-1}*x^{t-1} with a_0 the secret
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct ShamirPolynomial {
    #[zeroize(skip)]
    coefficients: Vec<Scalar>,
}

impl ShamirPolynomial {
    fn from_secret<R: RngCore>(secret: Scalar, threshold: usize, rng: &mut R) -> Self {
        let mut coefficients = vec![secret];
        for _ in 1..threshold {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            coefficients.push(Scalar::from_bytes_mod_order(bytes));
        }
        ShamirPolynomial { coefficients }
    }

    /// Horner evaluation
    fn evaluate(&self, x: Scalar) -> Scalar {
        let mut result = Scalar::ZERO;
        for coeff in self.coefficients.iter().rev() {
            result = result * x + coeff;
        }
        result
    }
}

/// One share of a secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShamirShare {
    x: u8,
    ys: Vec<[u8; 32]>,
}

impl ShamirShare {
    /// x coordinate of this share (never 0)
    pub fn index(&self) -> u8 {
        self.x
    }
}

fn interpolate_at_zero(points: &[(Scalar, Scalar)]) -> Scalar {
    let mut result = Scalar::ZERO;
    for (i, (x_i, y_i)) in points.iter().enumerate() {
        let mut basis = Scalar::ONE;
        for (j, (x_j, _)) in points.iter().enumerate() {
            if i != j {
                // L_i(0) *= -x_j / (x_i - x_j)
                basis *= -x_j * (x_i - x_j).invert();
            }
        }
        result += y_i * basis;
    }
    result
}

/// Split `secret` into `nb_shares` shares, any `threshold` of which recover it
pub fn make_shares(
    threshold: usize,
    secret: &[u8],
    nb_shares: usize,
) -> Result<Vec<ShamirShare>, ShamirError> {
    if nb_shares > usize::from(u8::MAX) {
        return Err(ShamirError::TooManyShares);
    }
    if threshold == 0 || threshold > nb_shares {
        return Err(ShamirError::InvalidThreshold {
            threshold,
            shares: nb_shares,
        });
    }

    let mut framed = (secret.len() as u32).to_le_bytes().to_vec();
    framed.extend_from_slice(secret);

    let mut rng = rand::rngs::OsRng;
    let polynomials: Vec<ShamirPolynomial> = framed
        .chunks(CHUNK_SIZE)
        .map(|chunk| {
            let mut bytes = [0u8; 32];
            bytes[..chunk.len()].copy_from_slice(chunk);
            ShamirPolynomial::from_secret(Scalar::from_bytes_mod_order(bytes), threshold, &mut rng)
        })
        .collect();
    framed.zeroize();

    Ok((1..=nb_shares as u8)
        .map(|x| ShamirShare {
            x,
            ys: polynomials
                .iter()
                .map(|poly| poly.evaluate(Scalar::from(u64::from(x))).to_bytes())
                .collect(),
        })
        .collect())
}

/// Recover a secret from at least `threshold` distinct shares
pub fn recover_secret(threshold: usize, shares: &[ShamirShare]) -> Result<Vec<u8>, ShamirError> {
    let mut distinct: Vec<&ShamirShare> = Vec::new();
    for share in shares {
        match distinct.iter().find(|s| s.x == share.x) {
            Some(existing) if existing.ys != share.ys => return Err(ShamirError::CorruptedSecret),
            Some(_) => {}
            None => distinct.push(share),
        }
    }
    if threshold == 0 || distinct.len() < threshold {
        return Err(ShamirError::NotEnoughShares);
    }
    let selected = &distinct[..threshold];
    let nb_chunks = selected[0].ys.len();
    if selected.iter().any(|s| s.x == 0 || s.ys.len() != nb_chunks) {
        return Err(ShamirError::CorruptedSecret);
    }

    let mut framed = Vec::with_capacity(nb_chunks * CHUNK_SIZE);
    for chunk_index in 0..nb_chunks {
        let mut points = Vec::with_capacity(threshold);
        for share in selected {
            let y = Option::<Scalar>::from(Scalar::from_canonical_bytes(share.ys[chunk_index]))
                .ok_or(ShamirError::CorruptedSecret)?;
            points.push((Scalar::from(u64::from(share.x)), y));
        }
        let bytes = interpolate_at_zero(&points).to_bytes();
        if bytes[CHUNK_SIZE..].iter().any(|b| *b != 0) {
            return Err(ShamirError::CorruptedSecret);
        }
        framed.extend_from_slice(&bytes[..CHUNK_SIZE]);
    }

    if framed.len() < 4 {
        return Err(ShamirError::CorruptedSecret);
    }
    let (len_bytes, rest) = framed.split_at(4);
    let mut raw_len = [0u8; 4];
    raw_len.copy_from_slice(len_bytes);
    let len = u32::from_le_bytes(raw_len) as usize;
    if len > rest.len() || rest[len..].iter().any(|b| *b != 0) {
        return Err(ShamirError::CorruptedSecret);
    }
    Ok(rest[..len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_polynomial_evaluate_at_zero_is_secret() {
        let mut rng = rand::thread_rng();
        let secret = Scalar::from(123u64);
        let poly = ShamirPolynomial::from_secret(secret, 3, &mut rng);
        assert_eq!(poly.evaluate(Scalar::ZERO), secret);
    }

    #[test]
    fn test_any_threshold_subset_recovers() {
        let secret = b"a secret longer than a single thirty-one byte chunk";
        let shares = make_shares(3, secret, 5).unwrap();
        assert_eq!(recover_secret(3, &shares[..3]).unwrap(), secret);
        assert_eq!(recover_secret(3, &shares[2..]).unwrap(), secret);
        let picked = vec![shares[4].clone(), shares[0].clone(), shares[2].clone()];
        assert_eq!(recover_secret(3, &picked).unwrap(), secret);
    }

    #[test]
    fn test_not_enough_shares() {
        let shares = make_shares(3, b"secret", 5).unwrap();
        assert_eq!(recover_secret(3, &shares[..2]), Err(ShamirError::NotEnoughShares));
        let duplicated = vec![shares[0].clone(), shares[0].clone(), shares[1].clone()];
        assert_eq!(recover_secret(3, &duplicated), Err(ShamirError::NotEnoughShares));
    }

    #[test]
    fn test_corrupted_share_is_detected() {
        let mut shares = make_shares(2, b"secret", 3).unwrap();
        shares[1].ys[0] = Scalar::from(7u64).to_bytes();
        assert_eq!(recover_secret(2, &shares[..2]), Err(ShamirError::CorruptedSecret));
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(
            make_shares(0, b"s", 3),
            Err(ShamirError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            make_shares(4, b"s", 3),
            Err(ShamirError::InvalidThreshold { .. })
        ));
        assert_eq!(make_shares(1, b"s", 256), Err(ShamirError::TooManyShares));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn prop_split_then_recover(secret in proptest::collection::vec(any::<u8>(), 0..100), threshold in 1usize..5, extra in 0usize..3) {
            let shares = make_shares(threshold, &secret, threshold + extra).unwrap();
            prop_assert_eq!(recover_secret(threshold, &shares[extra..]).unwrap(), secret);
        }
    }
}
