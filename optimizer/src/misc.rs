//! Useful functions.

/// Log of the sum of the exponentials, stable for very negative inputs.
pub fn logsumexp(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return std::f64::NEG_INFINITY;
    }
    let max = xs.iter().max_by(|x, y| x.partial_cmp(y).unwrap()).unwrap();
    if max.is_infinite() {
        return *max;
    }
    let sum = xs.iter().map(|x| (x - max).exp()).sum::<f64>().ln();
    max + sum
}

/// Natural log of the Normal(mean, sd) density at `x`.
pub fn ln_normal_pdf(x: f64, mean: f64, sd: f64) -> f64 {
    let z = (x - mean) / sd;
    -0.5 * z * z - sd.ln() - 0.5 * (2f64 * std::f64::consts::PI).ln()
}

pub fn revcmp(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|base| match base.to_ascii_uppercase() {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' => b'A',
            _ => b'N',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn logsumexp_matches_direct_sum() {
        let xs = [-1f64, -2f64, -3f64];
        let direct: f64 = xs.iter().map(|x| x.exp()).sum::<f64>().ln();
        assert!((logsumexp(&xs) - direct).abs() < 1e-10);
        assert!(logsumexp(&[]).is_infinite());
    }
    #[test]
    fn normal_pdf_peaks_at_mean() {
        let at_mean = ln_normal_pdf(200., 200., 10.);
        let off = ln_normal_pdf(230., 200., 10.);
        assert!(at_mean > off);
    }
    #[test]
    fn revcmp_small() {
        assert_eq!(revcmp(b"ACGT"), b"ACGT".to_vec());
        assert_eq!(revcmp(b"AACG"), b"CGTT".to_vec());
    }
}
