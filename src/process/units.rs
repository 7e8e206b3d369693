//! Unit conversion for axes and channels.
//!
//! Length and time convert by scale factor. Length units also convert to
//! and from photon energy (`eV`, `meV`) and wavenumber (`wn`, `cm-1`),
//! pivoting through wavelength in nm.

const HC_EV_NM: f64 = 1239.841_984;

fn length_factor(unit: &str) -> Option<f64> {
    Some(match unit {
        "m" => 1.0,
        "cm" => 1e-2,
        "mm" => 1e-3,
        "um" | "µm" => 1e-6,
        "nm" => 1e-9,
        "A" | "Å" | "angstrom" => 1e-10,
        "pm" => 1e-12,
        _ => return None,
    })
}

fn time_factor(unit: &str) -> Option<f64> {
    Some(match unit {
        "s" => 1.0,
        "ms" => 1e-3,
        "us" | "µs" => 1e-6,
        "ns" => 1e-9,
        "ps" => 1e-12,
        "fs" => 1e-15,
        _ => return None,
    })
}

fn is_spectral(unit: &str) -> bool {
    matches!(unit, "eV" | "meV" | "wn" | "cm-1")
}

/// Wavelength in nm for a value in a length or spectral unit.
fn to_nm(value: f64, unit: &str) -> Option<f64> {
    if let Some(f) = length_factor(unit) {
        return Some(value * f / 1e-9);
    }
    match unit {
        "eV" => Some(HC_EV_NM / value),
        "meV" => Some(HC_EV_NM * 1e3 / value),
        "wn" | "cm-1" => Some(1e7 / value),
        _ => None,
    }
}

fn from_nm(nm: f64, unit: &str) -> Option<f64> {
    if let Some(f) = length_factor(unit) {
        return Some(nm * 1e-9 / f);
    }
    match unit {
        "eV" => Some(HC_EV_NM / nm),
        "meV" => Some(HC_EV_NM * 1e3 / nm),
        "wn" | "cm-1" => Some(1e7 / nm),
        _ => None,
    }
}

pub fn is_valid_conversion(from: &str, to: &str) -> bool {
    if from == to {
        return true;
    }
    let lengthish = |u: &str| length_factor(u).is_some() || is_spectral(u);
    (time_factor(from).is_some() && time_factor(to).is_some()) || (lengthish(from) && lengthish(to))
}

/// Convert `value` from `from` to `to`; `None` when the units are unrelated.
pub fn convert(value: f64, from: &str, to: &str) -> Option<f64> {
    if from == to {
        return Some(value);
    }
    if let (Some(a), Some(b)) = (time_factor(from), time_factor(to)) {
        return Some(value * a / b);
    }
    if let (Some(a), Some(b)) = (length_factor(from), length_factor(to)) {
        return Some(value * a / b);
    }
    if !is_valid_conversion(from, to) {
        return None;
    }
    to_nm(value, from).and_then(|nm| from_nm(nm, to))
}
