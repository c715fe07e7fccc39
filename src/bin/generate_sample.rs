//! Writes a synthetic NIR export and a matching Dumas table for trying the
//! pipeline end to end.
//!
//! Usage: `generate_sample [OUT_DIR]` (default `input_files`).

use std::fmt::{self, Write as _};
use std::path::PathBuf;

use anyhow::{Context, Result};

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

fn generate_spectrum(
    wavelengths: &[f64],
    bands: &[(f64, f64, f64)],
    noise_level: f64,
    rng: &mut SimpleRng,
) -> Vec<f64> {
    wavelengths
        .iter()
        .map(|&wl| {
            // Sloping baseline typical of diffuse reflectance.
            let baseline = 0.2 + 0.00012 * (wl - 1100.0);
            let signal: f64 = bands
                .iter()
                .map(|&(mu, sigma, amp)| gaussian(wl, mu, sigma, amp))
                .sum();
            baseline + signal + rng.gauss(0.0, noise_level)
        })
        .collect()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

struct Sample {
    title: &'static str,
    protein: f64,
    moisture: f64,
}

const SAMPLES: [Sample; 4] = [
    Sample { title: "Wheat 01", protein: 12.1, moisture: 11.4 },
    Sample { title: "Wheat 02", protein: 13.4, moisture: 10.8 },
    Sample { title: "Barley 01", protein: 10.2, moisture: 12.3 },
    Sample { title: "Soy 01", protein: 36.5, moisture: 9.1 },
];

const FIRST_NM: f64 = 1100.0;
const STEP_NM: f64 = 2.0;
const N_POINTS: usize = 701;

fn header(out: &mut String, title: &str, minute: usize, serial: &str) -> fmt::Result {
    writeln!(out, "##TITLE={title}")?;
    writeln!(out, "##JCAMP-DX=4.24")?;
    writeln!(out, "##DATA TYPE=NEAR INFRARED SPECTRUM")?;
    writeln!(out, "##ORIGIN=Synthetic")?;
    writeln!(out, "##OWNER=Lab")?;
    writeln!(out, "##LONG DATE=2024/12/30 10:{minute:02}:00")?;
    writeln!(out, "##SPECTROMETER/DATA SYSTEM=NIR Analyzer")?;
    writeln!(out, "##INSTRUMENT S/N={serial}")?;
    writeln!(out, "##XUNITS=NANOMETERS")?;
    writeln!(out, "##YUNITS=LOG(1/R)")?;
    writeln!(out, "##XFACTOR=1")?;
    writeln!(out, "##YFACTOR=1")?;
    writeln!(out, "##FIRSTX={FIRST_NM}")?;
    writeln!(out, "##LASTX={}", FIRST_NM + STEP_NM * (N_POINTS - 1) as f64)?;
    writeln!(out, "##DELTAX={STEP_NM}")?;
    writeln!(out, "##NPOINTS={N_POINTS}")
}

fn export(rng: &mut SimpleRng) -> Result<String, fmt::Error> {
    let wavelengths: Vec<f64> = (0..N_POINTS).map(|i| FIRST_NM + i as f64 * STEP_NM).collect();

    let mut out = String::new();
    // Container block, dropped on ingest.
    writeln!(out, "##TITLE=DATA\n##JCAMP-DX=4.24\n##DATA TYPE=LINK\n##BLOCKS={}\n", SAMPLES.len())?;

    for (i, sample) in SAMPLES.iter().enumerate() {
        // Water near 1940 nm, protein N-H near 2180 nm, C-H near 1730 nm.
        let bands = [
            (1940.0, 45.0, sample.moisture / 40.0),
            (2180.0, 35.0, sample.protein / 80.0),
            (1730.0, 30.0, 0.12),
        ];
        let ys = generate_spectrum(&wavelengths, &bands, 0.002, rng);
        header(&mut out, sample.title, i * 5, "NIR-0042")?;

        // Last sample uses the y-only form.
        if i + 1 == SAMPLES.len() {
            writeln!(out, "##XYDATA=(Y..Y)")?;
            for chunk in ys.chunks(10) {
                let line: Vec<String> = chunk.iter().map(|y| format!("{y:.5}")).collect();
                writeln!(out, "{}", line.join(" "))?;
            }
        } else {
            writeln!(out, "##XYDATA=(X++(Y..Y))")?;
            for (x, y) in wavelengths.iter().zip(&ys) {
                writeln!(out, "{x} {y:.5}")?;
            }
        }
        writeln!(out, "##END=\n")?;
    }
    Ok(out)
}

fn assay_table(rng: &mut SimpleRng) -> Result<String, fmt::Error> {
    let mut out = String::from("Dumas result export\n");
    out.push_str(
        "No.\tHole Pos.\tWeight [mg]\tName\tMethod\tN Area\tN [%]\tN Factor\t\
         Protein [%]\tProtein Factor\tMoisture [%]\tDate\tTime\n",
    );
    for (i, sample) in SAMPLES.iter().enumerate() {
        let factor = 6.25;
        let protein = sample.protein + rng.gauss(0.0, 0.05);
        writeln!(
            out,
            "{}\tA{}\t{:.1}\t{}\tGrain\t{:.0}\t{:.3}\t{factor}\t{:.2}\t{factor}\t{:.2}\t30.12.2024\t11:{:02}:00",
            i + 1,
            i + 1,
            150.0 + rng.gauss(0.0, 1.0),
            sample.title,
            protein * 1000.0,
            protein / factor,
            protein,
            sample.moisture,
            i * 3,
        )?;
    }
    Ok(out)
}

fn main() -> Result<()> {
    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("input_files"));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let mut rng = SimpleRng::new(42);

    let dx_path = out_dir.join("Device2_20241230.dx");
    let text = export(&mut rng).context("formatting export")?;
    std::fs::write(&dx_path, text)
        .with_context(|| format!("writing {}", dx_path.display()))?;

    let assay_path = out_dir.join("Device1_20241230.txt");
    let table = assay_table(&mut rng).context("formatting assay table")?;
    std::fs::write(&assay_path, table)
        .with_context(|| format!("writing {}", assay_path.display()))?;

    println!(
        "Wrote {} spectra ({N_POINTS} points each) to {} and {} assay rows to {}",
        SAMPLES.len(),
        dx_path.display(),
        SAMPLES.len(),
        assay_path.display()
    );
    Ok(())
}
