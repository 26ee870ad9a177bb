//! Loyalty point assignment for ingested venues.
//!
//! Points are drawn from a fixed discrete distribution over 0..=50 where 10
//! and 20 carry five times the weight of every other value. Venues without a
//! student discount, and venues in Edinburgh, always receive 0.

use std::sync::OnceLock;

use rand::Rng;

const MAX_POINTS: i32 = 50;
const BOOST_WEIGHT: u32 = 5;
const EXCLUDED_AREA: &str = "Edinburgh";

fn is_boosted(points: i32) -> bool {
    points == 10 || points == 20
}

/// Cumulative weight table, built once per process.
fn cumulative_weights() -> &'static [(i32, u32)] {
    static TABLE: OnceLock<Vec<(i32, u32)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = Vec::with_capacity((MAX_POINTS + 1) as usize);
        let mut total = 0u32;
        for points in 0..=MAX_POINTS {
            total += if is_boosted(points) { BOOST_WEIGHT } else { 1 };
            table.push((points, total));
        }
        table
    })
}

/// Pick a points value for a venue.
///
/// The RNG is injected so callers can seed it for reproducible draws;
/// production paths pass `rand::thread_rng()`.
pub fn pick_venue_points<R: Rng + ?Sized>(
    student_discount_present: bool,
    area: Option<&str>,
    rng: &mut R,
) -> i32 {
    if !student_discount_present {
        return 0;
    }
    if area
        .map(|a| a.trim().eq_ignore_ascii_case(EXCLUDED_AREA))
        .unwrap_or(false)
    {
        return 0;
    }

    let table = cumulative_weights();
    let total = table.last().map(|&(_, t)| t).unwrap_or(1);
    let roll = rng.gen_range(1..=total);
    for &(points, threshold) in table {
        if roll <= threshold {
            return points;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn no_discount_means_no_points() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(pick_venue_points(false, Some("Glasgow"), &mut rng), 0);
            assert_eq!(pick_venue_points(false, None, &mut rng), 0);
        }
    }

    #[test]
    fn edinburgh_is_excluded_case_insensitively() {
        let mut rng = StdRng::seed_from_u64(2);
        for area in ["Edinburgh", "edinburgh", "EDINBURGH", "  Edinburgh  "] {
            assert_eq!(pick_venue_points(true, Some(area), &mut rng), 0);
        }
    }

    #[test]
    fn draws_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1000 {
            let p = pick_venue_points(true, Some("Glasgow"), &mut rng);
            assert!((0..=50).contains(&p), "out of range: {p}");
        }
    }

    #[test]
    fn boosted_values_dominate_the_distribution() {
        let mut rng = StdRng::seed_from_u64(4);
        let trials = 59_000usize;
        let mut counts = [0usize; 51];
        for _ in 0..trials {
            let p = pick_venue_points(true, Some("Leith"), &mut rng);
            counts[p as usize] += 1;
        }

        let plain_total: usize = counts
            .iter()
            .enumerate()
            .filter(|(p, _)| !is_boosted(*p as i32))
            .map(|(_, c)| c)
            .sum();
        let plain_avg = plain_total as f64 / 49.0;

        for boosted in [10usize, 20] {
            let ratio = counts[boosted] as f64 / plain_avg;
            assert!(
                (3.5..=6.5).contains(&ratio),
                "expected ~5x weight for {boosted}, got ratio {ratio:.2}"
            );
        }
    }
}
