use std::fmt::Write as _;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, Float64Builder, ListBuilder, StringArray};
use arrow::record_batch::RecordBatch;
use clap::Parser;
use parquet::arrow::ArrowWriter;

/// Write synthetic inputs: a 10x20 photoluminescence map (grid adapter) and
/// a handful of spectra (spectra adapter).
#[derive(Parser)]
#[command(name = "generate_sample")]
struct Args {
    #[arg(long, default_value = "sample_grid.csv")]
    grid: PathBuf,

    #[arg(long, default_value = "sample_spectra.parquet")]
    spectra: PathBuf,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Seeded noise source so repeated runs write identical files.
struct Noise {
    state: [u64; 4],
}

impl Noise {
    fn seeded(seed: u64) -> Self {
        let mut state = [0u64; 4];
        let mut x = seed;
        for slot in &mut state {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        Noise { state }
    }

    // xoshiro256**
    fn next_u64(&mut self) -> u64 {
        let [a, b, c, d] = &mut self.state;
        let out = b.wrapping_mul(5).rotate_left(7).wrapping_mul(9);
        let t = *b << 17;
        *c ^= *a;
        *d ^= *b;
        *b ^= *c;
        *a ^= *d;
        *c ^= t;
        *d = d.rotate_left(45);
        out
    }

    fn uniform(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Detector noise with standard deviation `sigma`.
    fn normal(&mut self, sigma: f64) -> f64 {
        let u1 = self.uniform().max(1e-15);
        let u2 = self.uniform();
        sigma * (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }
}

/// Bright spot on a flat background, x 0..4.5 um by y 0..9.5 um.
fn grid_text(noise: &mut Noise) -> Result<String> {
    let xs: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
    let ys: Vec<f64> = (0..20).map(|j| j as f64 * 0.5).collect();

    let mut out = String::new();
    writeln!(out, "# instrument = synthetic PL mapper")?;
    writeln!(out, "# channel = pl")?;
    writeln!(out, "# channel_unit = counts")?;
    writeln!(out, "# exposure_s = 0.5")?;
    let header: Vec<String> = ys.iter().map(|y| format!("{y:.1}")).collect();
    writeln!(out, "x[um]|y[um],{}", header.join(","))?;
    for &x in &xs {
        let row: Vec<String> = ys
            .iter()
            .map(|&y| {
                let spot = gaussian(x, 2.0, 1.0, 1.0) * gaussian(y, 5.0, 2.0, 900.0);
                format!("{:.3}", 100.0 + spot + noise.normal(5.0))
            })
            .collect();
        writeln!(out, "{x:.1},{}", row.join(","))?;
    }
    Ok(out)
}

fn spectra_batch(noise: &mut Noise) -> Result<RecordBatch> {
    // Wavelengths 500..700 nm, step 2
    let wavelengths: Vec<f64> = (0..100).map(|i| 500.0 + i as f64 * 2.0).collect();
    let samples = [("film_A", 610.0), ("film_B", 640.0), ("film_C", 655.0)];

    let mut x_builder = ListBuilder::new(Float64Builder::new());
    let mut y_builder = ListBuilder::new(Float64Builder::new());
    for &(_, peak) in &samples {
        x_builder.values().append_slice(&wavelengths);
        x_builder.append(true);
        for &wl in &wavelengths {
            y_builder
                .values()
                .append_value(gaussian(wl, peak, 12.0, 1.0) + noise.normal(0.01));
        }
        y_builder.append(true);
    }
    let names: Vec<&str> = samples.iter().map(|(n, _)| *n).collect();
    let peaks: Vec<f64> = samples.iter().map(|(_, p)| *p).collect();

    RecordBatch::try_from_iter([
        ("x", Arc::new(x_builder.finish()) as ArrayRef),
        ("y", Arc::new(y_builder.finish()) as ArrayRef),
        ("sample", Arc::new(StringArray::from(names)) as ArrayRef),
        ("peak_nm", Arc::new(Float64Array::from(peaks)) as ArrayRef),
    ])
    .context("building spectra batch")
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut noise = Noise::seeded(args.seed);

    std::fs::write(&args.grid, grid_text(&mut noise)?)
        .with_context(|| format!("writing {}", args.grid.display()))?;
    println!("Wrote 10x20 grid to {}", args.grid.display());

    let batch = spectra_batch(&mut noise)?;
    let file = File::create(&args.spectra)
        .with_context(|| format!("creating {}", args.spectra.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;
    println!("Wrote {} spectra to {}", batch.num_rows(), args.spectra.display());
    Ok(())
}
