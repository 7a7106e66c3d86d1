//! Two-operand tensor contractions as explicit plans.
//!
//! A contraction is written as subscripts, e.g. `"bdjN, mNdc -> bmjc"`: every label is a single character naming one
//! axis. Labels shared by both operands and absent from the output are summed over; every other label must appear
//! exactly once in one operand and once in the output. Whitespace is ignored.
//!
//! The plan is resolved to
//!
//! 1. permute `a` to `(free_a, summed)` and `b` to `(summed, free_b)`;
//! 2. reshape both to matrices and multiply;
//! 3. reshape to `(free_a, free_b)` and permute to the requested output order.

use crate::prelude::*;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contraction {
    labels_a: Vec<char>,
    labels_b: Vec<char>,
    labels_out: Vec<char>,
    /// axis permutation turning `a` into `(free_a, summed)`
    perm_a: Vec<usize>,
    /// axis permutation turning `b` into `(summed, free_b)`
    perm_b: Vec<usize>,
    /// axis permutation turning `(free_a, free_b)` into the output order
    perm_out: Vec<usize>,
    nfree_a: usize,
    nsum: usize,
}

fn has_duplicates(labels: &[char]) -> bool {
    labels.iter().enumerate().any(|(n, c)| labels[..n].contains(c))
}

impl Contraction {
    pub fn new(subscripts: &str) -> CCDResult<Self> {
        let compact: String = subscripts.chars().filter(|c| !c.is_whitespace()).collect();
        let err = |reason: &str| CCDError::Contraction(format!("{reason} in \"{subscripts}\""));

        let (inputs, out) = compact.split_once("->").ok_or_else(|| err("missing \"->\""))?;
        let (a, b) = inputs.split_once(',').ok_or_else(|| err("expected two operands"))?;
        if b.contains(',') {
            return Err(err("expected two operands"));
        }

        let labels_a: Vec<char> = a.chars().collect();
        let labels_b: Vec<char> = b.chars().collect();
        let labels_out: Vec<char> = out.chars().collect();
        if [&labels_a, &labels_b, &labels_out].iter().any(|l| l.iter().any(|c| !c.is_ascii_alphabetic())) {
            return Err(err("labels must be ascii letters"));
        }
        if has_duplicates(&labels_a) || has_duplicates(&labels_b) || has_duplicates(&labels_out) {
            return Err(err("repeated label within one operand"));
        }

        let mut free_a = vec![];
        let mut summed_a = vec![];
        for (n, c) in labels_a.iter().enumerate() {
            match (labels_b.contains(c), labels_out.contains(c)) {
                (true, false) => summed_a.push(n),
                (false, true) => free_a.push(n),
                (true, true) => return Err(err("batched labels are not supported")),
                (false, false) => return Err(err("label of the first operand appears nowhere else")),
            }
        }

        // summed axes of b in the order they appear in a
        let summed_b: Vec<usize> = summed_a
            .iter()
            .map(|&n| labels_b.iter().position(|c| *c == labels_a[n]).unwrap_or_default())
            .collect();
        let mut free_b = vec![];
        for (n, c) in labels_b.iter().enumerate() {
            if labels_a.contains(c) {
                continue;
            }
            if !labels_out.contains(c) {
                return Err(err("label of the second operand appears nowhere else"));
            }
            free_b.push(n);
        }

        let labels_free: Vec<char> =
            free_a.iter().map(|&n| labels_a[n]).chain(free_b.iter().map(|&n| labels_b[n])).collect();
        if labels_free.len() != labels_out.len() {
            return Err(err("output label missing from both operands"));
        }
        let perm_out =
            labels_out.iter().map(|c| labels_free.iter().position(|f| f == c).unwrap_or_default()).collect();

        let nfree_a = free_a.len();
        let nsum = summed_a.len();
        let perm_a = free_a.into_iter().chain(summed_a).collect();
        let perm_b = summed_b.into_iter().chain(free_b).collect();

        Ok(Self { labels_a, labels_b, labels_out, perm_a, perm_b, perm_out, nfree_a, nsum })
    }

    /// Axis lengths by label, checking operand ranks and that shared labels agree.
    fn dimensions(&self, a: &TsrView, b: &TsrView) -> CCDResult<HashMap<char, usize>> {
        let check_rank = |labels: &[char], shape: &[usize], which: &str| {
            if labels.len() != shape.len() {
                return Err(CCDError::Contraction(format!(
                    "{which} operand has rank {}, subscripts expect {}",
                    shape.len(),
                    labels.len()
                )));
            }
            Ok(())
        };
        check_rank(&self.labels_a, a.shape(), "first")?;
        check_rank(&self.labels_b, b.shape(), "second")?;

        let mut dims = HashMap::new();
        for (labels, shape) in [(&self.labels_a, a.shape()), (&self.labels_b, b.shape())] {
            for (c, &len) in labels.iter().zip(shape.iter()) {
                match dims.insert(*c, len) {
                    Some(prev) if prev != len => {
                        return Err(CCDError::Contraction(format!(
                            "label '{c}' has length {prev} in one operand and {len} in the other"
                        )));
                    },
                    _ => (),
                }
            }
        }
        Ok(dims)
    }

    pub fn apply(&self, a: TsrView, b: TsrView) -> CCDResult<Tsr> {
        let dims = self.dimensions(&a, &b)?;

        let shape_a: Vec<usize> = self.perm_a.iter().map(|&n| dims[&self.labels_a[n]]).collect();
        let shape_b: Vec<usize> = self.perm_b.iter().map(|&n| dims[&self.labels_b[n]]).collect();
        let size_free_a: usize = shape_a[..self.nfree_a].iter().product();
        let size_sum: usize = shape_a[self.nfree_a..].iter().product();
        let size_free_b: usize = shape_b[self.nsum..].iter().product();

        let mat_a: Tsr = a.transpose(&self.perm_a).into_contig(RowMajor);
        let mat_b: Tsr = b.transpose(&self.perm_b).into_contig(RowMajor);
        let prod = mat_a.into_shape([size_free_a, size_sum]) % mat_b.into_shape([size_sum, size_free_b]);

        let shape_free: Vec<usize> =
            shape_a[..self.nfree_a].iter().chain(shape_b[self.nsum..].iter()).copied().collect();
        let prod = prod.into_shape(&shape_free);
        Ok(prod.transpose(&self.perm_out).into_contig(RowMajor))
    }

    pub fn output_labels(&self) -> &[char] {
        &self.labels_out
    }
}

/// Parse and apply a contraction in one go.
///
/// ```norun
/// let chi_nj = contract("dcjm, mNdc -> Nj", t2.view(), eri_oovv.view())?;
/// ```
pub fn contract(subscripts: &str, a: TsrView, b: TsrView) -> CCDResult<Tsr> {
    Contraction::new(subscripts)?.apply(a, b)
}
