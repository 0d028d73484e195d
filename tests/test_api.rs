use neighgrid_rs::{NeighborList, build_neighborlists};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

fn sorted_edges(nl: &NeighborList) -> Vec<(usize, usize, [i32; 3])> {
    let mut e: Vec<_> = nl.edges().collect();
    e.sort();
    e
}

/// Every (i, j, shift) with |x_j - x_i + shift * L| <= cutoff, shifts in -1..=1.
fn brute_force(pos: &[[f64; 3]], len: f64, cutoff: f64) -> Vec<(usize, usize, [i32; 3])> {
    let mut out = Vec::new();
    for i in 0..pos.len() {
        for j in 0..pos.len() {
            for sx in -1..=1 {
                for sy in -1..=1 {
                    for sz in -1..=1 {
                        if i == j && (sx, sy, sz) == (0, 0, 0) {
                            continue;
                        }
                        let s = [sx, sy, sz];
                        let r2: f64 = (0..3)
                            .map(|d| pos[j][d] - pos[i][d] + s[d] as f64 * len)
                            .map(|v| v * v)
                            .sum();
                        if r2 <= cutoff * cutoff {
                            out.push((i, j, s));
                        }
                    }
                }
            }
        }
    }
    out.sort();
    out
}

#[test]
fn test_build_neighborlists_simple() {
    let positions = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
    let result = build_neighborlists(&positions, 1.5, None).unwrap();

    // full list: both directions
    assert_eq!(result.edge_index.len(), 4);
    assert_eq!(sorted_edges(&result), vec![(0, 1, [0, 0, 0]), (1, 0, [0, 0, 0])]);
    assert_eq!(result.shifts.len(), 6);
}

#[test]
fn test_build_neighborlists_pbc() {
    let positions = [[1.0, 1.0, 1.0], [9.0, 1.0, 1.0]];
    let h = [[10.0, 0.0, 0.0], [0.0, 10.0, 0.0], [0.0, 0.0, 10.0]];
    let result = build_neighborlists(&positions, 2.5, Some((&h, [true; 3]))).unwrap();

    // 9.0 + (-1 * 10.0) = -1.0, two away from 1.0
    assert_eq!(sorted_edges(&result), vec![(0, 1, [-1, 0, 0]), (1, 0, [1, 0, 0])]);
}

#[test]
fn test_mixed_periodicity() {
    let positions = [[0.2, 0.2, 0.5], [4.8, 4.8, 0.5], [0.2, 4.8, 9.0]];
    let h = [[5.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 5.0]];
    let result = build_neighborlists(&positions, 1.0, Some((&h, [true, true, false]))).unwrap();
    // atom 2 is far along open z
    assert_eq!(sorted_edges(&result), vec![(0, 1, [-1, -1, 0]), (1, 0, [1, 1, 0])]);
}

#[test]
fn test_random_periodic_matches_brute_force() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(2024);
    let len = 7.0;
    let h = [[len, 0.0, 0.0], [0.0, len, 0.0], [0.0, 0.0, len]];
    for cutoff in [0.8, 1.7, 3.2] {
        let pos: Vec<[f64; 3]> = (0..90)
            .map(|_| std::array::from_fn(|_| rng.gen_range(0.0..len)))
            .collect();
        let result = build_neighborlists(&pos, cutoff, Some((&h, [true; 3]))).unwrap();
        assert_eq!(sorted_edges(&result), brute_force(&pos, len, cutoff), "cutoff {cutoff}");
    }
}
