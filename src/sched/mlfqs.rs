//! 17.14 fixed-point arithmetic and the MLFQS recalculation formulas.
//!
//! Grounded directly in `threads/thread.c`'s fixed-point helpers and the
//! three formulas in `priority_calculator`, `recent_cpu_calculator`, and
//! `load_avg_calculator`. `Fp` wraps the raw `i64` so the conversion and
//! arithmetic rules can't be applied inconsistently by callers the way a
//! bare `i32`/`i64` would invite.

use crate::config::{NICE_MAX, NICE_MIN, PRI_MAX, PRI_MIN};

/// `1 << 14`, the scaling factor for 17.14 fixed point.
const F: i64 = 1 << 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fp(i64);

impl Fp {
    pub fn from_int(n: i32) -> Self {
        Fp((n as i64) * F)
    }

    pub fn to_int_truncate(self) -> i32 {
        (self.0 / F) as i32
    }

    pub fn to_int_round(self) -> i32 {
        if self.0 >= 0 {
            ((self.0 + F / 2) / F) as i32
        } else {
            ((self.0 - F / 2) / F) as i32
        }
    }

    pub fn add(self, other: Fp) -> Fp {
        Fp(self.0 + other.0)
    }

    pub fn sub(self, other: Fp) -> Fp {
        Fp(self.0 - other.0)
    }

    pub fn add_int(self, n: i32) -> Fp {
        Fp(self.0 + (n as i64) * F)
    }

    pub fn sub_int(self, n: i32) -> Fp {
        Fp(self.0 - (n as i64) * F)
    }

    pub fn mul(self, other: Fp) -> Fp {
        Fp(((self.0 as i128) * (other.0 as i128) / (F as i128)) as i64)
    }

    pub fn mul_int(self, n: i32) -> Fp {
        Fp(self.0 * n as i64)
    }

    pub fn div(self, other: Fp) -> Fp {
        Fp((((self.0 as i128) * (F as i128)) / other.0 as i128) as i64)
    }

    pub fn div_int(self, n: i32) -> Fp {
        Fp(self.0 / n as i64)
    }

    pub fn raw(self) -> i32 {
        self.0 as i32
    }

    pub fn from_raw(raw: i32) -> Fp {
        Fp(raw as i64)
    }
}

/// `priority = PRI_MAX - (recent_cpu / 4) - (nice * 2)`, clamped to
/// `[PRI_MIN, PRI_MAX]`. Grounded in `priority_calculator`.
pub fn priority_calculator(recent_cpu: Fp, nice: i32) -> u8 {
    let p = Fp::from_int(PRI_MAX as i32)
        .sub(recent_cpu.div_int(4))
        .sub(Fp::from_int(nice * 2));
    p.to_int_round().clamp(PRI_MIN as i32, PRI_MAX as i32) as u8
}

/// `recent_cpu = (2*load_avg)/(2*load_avg + 1) * recent_cpu + nice`.
/// Grounded in `recent_cpu_calculator`.
pub fn recent_cpu_calculator(recent_cpu: Fp, load_avg: Fp, nice: i32) -> Fp {
    let two_la = load_avg.mul_int(2);
    let coeff = two_la.div(two_la.add_int(1));
    coeff.mul(recent_cpu).add_int(nice)
}

/// `load_avg = (59/60)*load_avg + (1/60)*ready_threads`. Grounded in
/// `load_avg_calculator`.
pub fn load_avg_calculator(load_avg: Fp, ready_threads: i32) -> Fp {
    let fifty_nine_sixtieths = Fp::from_int(59).div_int(60);
    let one_sixtieth = Fp::from_int(1).div_int(60);
    fifty_nine_sixtieths
        .mul(load_avg)
        .add(one_sixtieth.mul_int(ready_threads))
}

/// `recent_cpu += 1`, applied to the running thread once per tick.
/// Grounded in `recent_cpu_increment`.
pub fn recent_cpu_increment(recent_cpu: Fp) -> Fp {
    recent_cpu.add_int(1)
}

pub fn clamp_nice(nice: i32) -> i32 {
    nice.clamp(NICE_MIN, NICE_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_round_trip() {
        let fp = Fp::from_int(5);
        assert_eq!(fp.to_int_truncate(), 5);
        assert_eq!(fp.to_int_round(), 5);
    }

    fn approx(f: Fp, n: f64) -> bool {
        (f.raw() as f64 / F as f64 - n).abs() < 0.01
    }

    #[test]
    fn load_avg_converges_toward_ready_threads() {
        let mut la = Fp::from_int(0);
        for _ in 0..2000 {
            la = load_avg_calculator(la, 1);
        }
        assert!(approx(la, 1.0), "load_avg={:?}", la);
    }

    #[test]
    fn priority_decreases_as_recent_cpu_grows() {
        let low = priority_calculator(Fp::from_int(0), 0);
        let high = priority_calculator(Fp::from_int(40), 0);
        assert!(high < low);
    }

    #[test]
    fn priority_decreases_as_nice_grows() {
        let p0 = priority_calculator(Fp::from_int(0), 0);
        let p20 = priority_calculator(Fp::from_int(0), 20);
        assert!(p20 < p0);
    }

    #[test]
    fn recent_cpu_increment_adds_one_whole_unit() {
        let rc = Fp::from_int(3);
        let bumped = recent_cpu_increment(rc);
        assert_eq!(bumped.to_int_truncate(), 4);
    }
}
