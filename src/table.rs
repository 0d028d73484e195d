//! Square per-type-pair tables.
//!
//! Types are numbered 1..=n. Entries are stored flat in row-major order.
//! Cutoff tables are symmetric; the stencil policy tables (`half`, `skip`,
//! `bin_type`) are not in general.

#[derive(Clone, Debug, PartialEq)]
pub struct TypeTable<T> {
    n: usize,
    data: Vec<T>,
}

impl<T: Clone> TypeTable<T> {
    pub fn new(n: usize, fill: T) -> Self {
        Self {
            n,
            data: vec![fill; n * n],
        }
    }

    pub fn from_fn(n: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(n * n);
        for i in 1..=n {
            for j in 1..=n {
                data.push(f(i, j));
            }
        }
        Self { n, data }
    }

    pub fn ntypes(&self) -> usize {
        self.n
    }

    #[inline(always)]
    fn offset(&self, i: usize, j: usize) -> usize {
        debug_assert!(i >= 1 && i <= self.n && j >= 1 && j <= self.n);
        (i - 1) * self.n + (j - 1)
    }

    #[inline(always)]
    pub fn get(&self, i: usize, j: usize) -> &T {
        &self.data[self.offset(i, j)]
    }

    pub fn set(&mut self, i: usize, j: usize, v: T) {
        let o = self.offset(i, j);
        self.data[o] = v;
    }

    pub fn set_sym(&mut self, i: usize, j: usize, v: T) {
        self.set(i, j, v.clone());
        self.set(j, i, v);
    }

    pub fn map<U: Clone>(&self, mut f: impl FnMut(&T) -> U) -> TypeTable<U> {
        TypeTable {
            n: self.n,
            data: self.data.iter().map(&mut f).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &T)> {
        let n = self.n;
        self.data
            .iter()
            .enumerate()
            .map(move |(k, v)| (k / n + 1, k % n + 1, v))
    }
}

impl<T: Clone + PartialEq> TypeTable<T> {
    pub fn is_symmetric(&self) -> bool {
        (1..=self.n).all(|i| (i + 1..=self.n).all(|j| self.get(i, j) == self.get(j, i)))
    }
}

impl TypeTable<f64> {
    pub fn max(&self) -> f64 {
        self.data.iter().cloned().fold(0.0, f64::max)
    }

    /// Largest entry of row `i`.
    pub fn row_max(&self, i: usize) -> f64 {
        (1..=self.n).map(|j| *self.get(i, j)).fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_based_indexing() {
        let mut t = TypeTable::new(3, 0.0);
        t.set(1, 3, 2.5);
        assert_eq!(*t.get(1, 3), 2.5);
        assert_eq!(*t.get(3, 1), 0.0);
        assert!(!t.is_symmetric());
        t.set_sym(1, 3, 2.5);
        assert!(t.is_symmetric());
        assert_eq!(t.row_max(3), 2.5);
        assert_eq!(t.max(), 2.5);
    }

    #[test]
    fn test_from_fn_and_iter() {
        let t = TypeTable::from_fn(2, |i, j| i * 10 + j);
        let v: Vec<_> = t.iter().map(|(i, j, &x)| (i, j, x)).collect();
        assert_eq!(v, vec![(1, 1, 11), (1, 2, 12), (2, 1, 21), (2, 2, 22)]);
        let sq = t.map(|&x| x * x);
        assert_eq!(*sq.get(2, 1), 441);
    }
}
