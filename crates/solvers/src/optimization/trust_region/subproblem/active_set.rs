use ndarray::{Array1, ArrayView1};

/// Rank threshold for accepting a new normal.
const INDEPENDENCE_TOL: f64 = 1e-10;

/// Orthonormal factorization of the active constraint normals.
///
/// `q` spans the active normals (Gram-Schmidt), so `v − Σ (qᵢ·v) qᵢ` projects
/// onto their null space.
#[derive(Debug, Clone, Default)]
pub(super) struct ActiveSet {
    indices: Vec<usize>,
    normals: Vec<Array1<f64>>,
    q: Vec<Array1<f64>>,
}

impl ActiveSet {
    pub(super) fn len(&self) -> usize {
        self.indices.len()
    }

    pub(super) fn contains(&self, j: usize) -> bool {
        self.indices.contains(&j)
    }

    /// Adds constraint `j` with unit normal `a`.
    ///
    /// Returns `false`, leaving the set unchanged, when `a` is numerically
    /// dependent on the normals already active.
    pub(super) fn add(&mut self, j: usize, a: ArrayView1<'_, f64>) -> bool {
        let mut v = a.to_owned();
        for _ in 0..2 {
            for q in &self.q {
                let c = q.dot(&v);
                v.scaled_add(-c, q);
            }
        }
        let norm = v.dot(&v).sqrt();
        if norm <= INDEPENDENCE_TOL {
            return false;
        }
        self.q.push(v / norm);
        self.normals.push(a.to_owned());
        self.indices.push(j);
        true
    }

    /// Removes the constraint at position `pos` and refactors the rest.
    pub(super) fn remove(&mut self, pos: usize) {
        let mut indices = std::mem::take(&mut self.indices);
        let mut normals = std::mem::take(&mut self.normals);
        indices.remove(pos);
        normals.remove(pos);
        self.q.clear();
        for (j, a) in indices.into_iter().zip(normals) {
            self.add(j, a.view());
        }
    }

    /// Component of `v` orthogonal to every active normal.
    pub(super) fn project(&self, v: &Array1<f64>) -> Array1<f64> {
        let mut p = v.clone();
        for q in &self.q {
            let c = q.dot(&p);
            p.scaled_add(-c, q);
        }
        p
    }

    /// Least-squares multipliers `λ` with `−g ≈ Σ λᵢ aᵢ`.
    pub(super) fn multipliers(&self, g: &Array1<f64>) -> Vec<f64> {
        let k = self.len();
        let rhs: Vec<f64> = self.q.iter().map(|q| -q.dot(g)).collect();
        let mut lambda = vec![0.0; k];
        for i in (0..k).rev() {
            let mut sum = rhs[i];
            for (l, lam) in lambda.iter().enumerate().skip(i + 1) {
                sum -= self.q[i].dot(&self.normals[l]) * lam;
            }
            lambda[i] = sum / self.q[i].dot(&self.normals[i]);
        }
        lambda
    }
}
