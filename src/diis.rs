use crate::prelude::*;

/// One stored vector of the DIIS space.
struct DIISEntry {
    /// Iteration at which the vector was inserted.
    iteration: usize,

    /// Flattened vector to be extrapolated.
    vec: Tsr,

    /// Flattened error vector.
    err: Tsr,
}

/// Pulay DIIS extrapolation with all vectors kept in memory.
pub struct DIISIncore {
    pub flags: DIISIncoreFlags,

    /// Stored vectors, in insertion order.
    space: Vec<DIISEntry>,

    /// Number of insertions so far.
    niter: usize,
}

impl DIISIncore {
    /// Initialize DIIS object.
    pub fn new(flags: DIISIncoreFlags) -> Self {
        Self { flags, space: vec![], niter: 0 }
    }

    pub fn len(&self) -> usize {
        self.space.len()
    }

    pub fn is_empty(&self) -> bool {
        self.space.is_empty()
    }

    /// Index of the vector to drop when the space is full.
    ///
    /// The most recently inserted vector is never dropped: if it carries the largest error, the extrapolation is
    /// already going the wrong way and removing it would discard the newest information.
    fn get_head(&self) -> usize {
        let idx_oldest = (0..self.space.len()).min_by_key(|&idx| self.space[idx].iteration).unwrap_or(0);
        match self.flags.pop_strategy {
            DIISPopStrategy::Iteration => idx_oldest,
            DIISPopStrategy::ErrDiagonal => {
                let idx_latest = self.space.len().saturating_sub(1);
                let norms = self.space.iter().map(|entry| entry.err.l2_norm()).collect::<Vec<f64>>();
                (0..self.space.len())
                    .filter(|&idx| idx != idx_latest)
                    .max_by(|&a, &b| norms[a].total_cmp(&norms[b]))
                    .unwrap_or(idx_oldest)
            },
        }
    }

    /// Insert a vector and its error to the DIIS space, evicting one when the space is full.
    pub fn insert(&mut self, vec: Tsr, err: Tsr) {
        if !self.space.is_empty() && self.space.len() >= self.flags.space {
            let head = self.get_head();
            self.space.remove(head);
        }
        self.space.push(DIISEntry { iteration: self.niter, vec: vec.into_shape(-1), err: err.into_shape(-1) });
        self.niter += 1;
    }

    /// Extrapolate the flattened vector from the DIIS space.
    ///
    /// Returns `None` if the space is empty.
    pub fn extrapolate(&self) -> Option<Tsr> {
        let num_space = self.space.len();
        let latest = self.space.last()?;

        // not enough vectors for extrapolation
        if num_space < self.flags.min_space.max(1) {
            return Some(latest.vec.to_owned());
        }

        let device = latest.vec.device().clone();

        // bordered overlap of error vectors; row and column 0 are [0, 1, ..., 1]
        let mut ovlp: Tsr = rt::zeros(([num_space + 1, num_space + 1], &device));
        for i in 1..=num_space {
            ovlp[[0, i]] = 1.0;
            ovlp[[i, 0]] = 1.0;
        }
        for (i, j) in iproduct!(0..num_space, 0..num_space) {
            if j < i {
                continue;
            }
            let val = (self.space[i].err.view() % self.space[j].err.view()).to_scalar();
            ovlp[[i + 1, j + 1]] = val;
            ovlp[[j + 1, i + 1]] = val;
        }

        let ovlp = ovlp.view();
        let (w, v) = rt::linalg::eigh(&ovlp).into();

        // pseudo-inverse: drop near-null eigenvalues
        let eps = 30.0 * f64::EPSILON;
        let w = w.mapv(|x| if x.abs() < eps { 0.0 } else { 1.0 / x });

        // g: [1, 0, 0, ..., 0]
        let mut g: Tsr = rt::zeros(([num_space + 1], &device));
        g[[0]] = 1.0;

        // DIIS coefficients; c[0] is the Lagrange multiplier
        let c = (v.view() * w) % v.t() % g;

        let mut vec = latest.vec.zeros_like();
        for (idx, entry) in self.space.iter().enumerate() {
            vec += &entry.vec * c[[idx + 1]];
        }
        Some(vec)
    }

    /// Insert `vec` with error `err` and return the extrapolated vector in the shape of `vec`.
    pub fn update(&mut self, vec: Tsr, err: Tsr) -> Tsr {
        let shape = vec.shape().to_vec();
        self.insert(vec, err);
        match self.extrapolate() {
            Some(vec) => vec.into_shape(&shape),
            None => unreachable!("DIIS space cannot be empty right after an insertion"),
        }
    }
}
