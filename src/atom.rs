use crate::exclusion::SpecialBonds;
use nalgebra::Vector3;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum AtomError {
    #[error("Cannot add owned atom after ghost atoms")]
    LocalAfterGhost,
    #[error("Atom {atom} has invalid type {itype} (ntypes = {ntypes})")]
    InvalidType { atom: usize, itype: usize, ntypes: usize },
    #[error("Atom {0} has a non-finite coordinate")]
    NonFinite(usize),
    #[error("Per-atom array {0} has inconsistent length")]
    Inconsistent(&'static str),
    #[error("Atom index {0} out of range")]
    OutOfRange(usize),
}

/// Per-atom data seen by the neighbor code: owned atoms `0..nlocal` followed
/// by ghost atoms `nlocal..nall`.
#[derive(Clone, Debug, Default)]
pub struct Atoms {
    pub x: Vec<Vector3<f64>>,
    pub type_: Vec<usize>,
    pub tag: Vec<i64>,
    pub mask: Vec<u32>,
    pub radius: Vec<f64>,
    pub molecule: Vec<i64>,
    /// Periodic image of a ghost relative to the atom it was copied from.
    pub image: Vec<[i32; 3]>,
    pub special: Option<SpecialBonds>,
    pub nlocal: usize,
    pub ntypes: usize,
}

impl Atoms {
    pub fn new(ntypes: usize) -> Self {
        Self {
            ntypes,
            ..Default::default()
        }
    }

    pub fn nall(&self) -> usize {
        self.x.len()
    }

    pub fn nghost(&self) -> usize {
        self.x.len() - self.nlocal
    }

    pub fn is_molecular(&self) -> bool {
        self.special.is_some()
    }

    /// Adds an owned atom with tag `index + 1` and returns its index.
    pub fn add_local(&mut self, x: Vector3<f64>, itype: usize) -> Result<usize, AtomError> {
        let tag = self.nlocal as i64 + 1;
        self.add_local_tagged(x, itype, tag)
    }

    pub fn add_local_tagged(
        &mut self,
        x: Vector3<f64>,
        itype: usize,
        tag: i64,
    ) -> Result<usize, AtomError> {
        if self.nghost() > 0 {
            return Err(AtomError::LocalAfterGhost);
        }
        self.check_type(self.nlocal, itype)?;
        self.push(x, itype, tag, 1, 0.0, 0, [0; 3]);
        self.nlocal += 1;
        Ok(self.nlocal - 1)
    }

    pub fn add_ghost(
        &mut self,
        x: Vector3<f64>,
        itype: usize,
        tag: i64,
    ) -> Result<usize, AtomError> {
        self.check_type(self.nall(), itype)?;
        self.push(x, itype, tag, 1, 0.0, 0, [0; 3]);
        Ok(self.nall() - 1)
    }

    /// Adds a ghost that replicates atom `src` at position `x`.
    pub fn add_ghost_copy(
        &mut self,
        src: usize,
        x: Vector3<f64>,
        image: [i32; 3],
    ) -> Result<usize, AtomError> {
        if src >= self.nall() {
            return Err(AtomError::OutOfRange(src));
        }
        let base = self.image[src];
        let img = [base[0] + image[0], base[1] + image[1], base[2] + image[2]];
        self.push(
            x,
            self.type_[src],
            self.tag[src],
            self.mask[src],
            self.radius[src],
            self.molecule[src],
            img,
        );
        Ok(self.nall() - 1)
    }

    pub fn clear_ghosts(&mut self) {
        let n = self.nlocal;
        self.x.truncate(n);
        self.type_.truncate(n);
        self.tag.truncate(n);
        self.mask.truncate(n);
        self.radius.truncate(n);
        self.molecule.truncate(n);
        self.image.truncate(n);
    }

    pub fn set_radius(&mut self, i: usize, r: f64) -> Result<(), AtomError> {
        *self.radius.get_mut(i).ok_or(AtomError::OutOfRange(i))? = r;
        Ok(())
    }

    pub fn set_molecule(&mut self, i: usize, mol: i64) -> Result<(), AtomError> {
        *self.molecule.get_mut(i).ok_or(AtomError::OutOfRange(i))? = mol;
        Ok(())
    }

    pub fn set_mask(&mut self, i: usize, mask: u32) -> Result<(), AtomError> {
        *self.mask.get_mut(i).ok_or(AtomError::OutOfRange(i))? = mask;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AtomError> {
        let n = self.x.len();
        let lens = [
            ("type", self.type_.len()),
            ("tag", self.tag.len()),
            ("mask", self.mask.len()),
            ("radius", self.radius.len()),
            ("molecule", self.molecule.len()),
            ("image", self.image.len()),
        ];
        if let Some((name, _)) = lens.iter().find(|(_, l)| *l != n) {
            return Err(AtomError::Inconsistent(name));
        }
        if self.nlocal > n {
            return Err(AtomError::Inconsistent("nlocal"));
        }
        if let Some(sb) = &self.special
            && sb.len() < self.nlocal
        {
            return Err(AtomError::Inconsistent("special"));
        }
        for (i, (&t, x)) in self.type_.iter().zip(&self.x).enumerate() {
            self.check_type(i, t)?;
            if !x.iter().all(|v| v.is_finite()) {
                return Err(AtomError::NonFinite(i));
            }
        }
        Ok(())
    }

    fn check_type(&self, atom: usize, itype: usize) -> Result<(), AtomError> {
        if itype == 0 || itype > self.ntypes {
            return Err(AtomError::InvalidType {
                atom,
                itype,
                ntypes: self.ntypes,
            });
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        x: Vector3<f64>,
        itype: usize,
        tag: i64,
        mask: u32,
        radius: f64,
        molecule: i64,
        image: [i32; 3],
    ) {
        self.x.push(x);
        self.type_.push(itype);
        self.tag.push(tag);
        self.mask.push(mask);
        self.radius.push(radius);
        self.molecule.push(molecule);
        self.image.push(image);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_then_ghost_ordering() {
        let mut a = Atoms::new(2);
        assert_eq!(a.add_local(Vector3::zeros(), 1).unwrap(), 0);
        assert_eq!(a.add_local(Vector3::new(1.0, 0.0, 0.0), 2).unwrap(), 1);
        a.set_radius(1, 0.5).unwrap();
        let g = a.add_ghost_copy(1, Vector3::new(11.0, 0.0, 0.0), [1, 0, 0]).unwrap();
        assert_eq!(g, 2);
        assert_eq!(a.nlocal, 2);
        assert_eq!(a.nghost(), 1);
        assert_eq!(a.tag[g], 2);
        assert_eq!(a.type_[g], 2);
        assert_eq!(a.radius[g], 0.5);
        assert_eq!(a.image[g], [1, 0, 0]);
        assert_eq!(a.add_local(Vector3::zeros(), 1), Err(AtomError::LocalAfterGhost));
        a.clear_ghosts();
        assert_eq!(a.nall(), 2);
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_invalid_type_and_coordinates() {
        let mut a = Atoms::new(1);
        assert!(matches!(
            a.add_local(Vector3::zeros(), 2),
            Err(AtomError::InvalidType { itype: 2, .. })
        ));
        a.add_local(Vector3::new(f64::NAN, 0.0, 0.0), 1).unwrap();
        assert_eq!(a.validate(), Err(AtomError::NonFinite(0)));
    }
}
