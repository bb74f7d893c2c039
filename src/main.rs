use std::error::Error;
use std::time::Instant;

use xpsfit::prelude::*;
use xpsfit::gridspace;

/// Fit a synthetic Pb 4f doublet on a sloped background and print the report
fn main() -> Result<(), Box<dyn Error>> {
    let f72 = PeakShape::new(136.9, 0.62, 1200.0, 0.25, 0.15);
    let f52 = PeakShape::new(141.8, 0.62, 900.0, 0.25, 0.15);
    let xs: Vec<f64> = gridspace(132.0, 146.0, 0.05);
    let ys: Vec<f64> = xs
        .iter()
        .map(|x| f72.density(*x) + f52.density(*x) + 80.0 - 1.5 * (x - 139.0))
        .collect();
    let spectrum = Spectrum::new(xs, ys)?.with_metadata(
        SpectrumMetadata::new("Pb 4f demo")
            .acquisition_time(120.0)
            .instrument("synthetic"),
    );

    let seeds = xpsfit::text::parse_seed_table(
        "\
label,center,cmin,cmax,sigma,smin,smax,amp,amin,amax,time,gamma,gmin,gmax,skew,kmin,kmax
Pb 4f 7/2,137.0,136.5,137.5,0.8,0.3,2.0,1000,0,5000,120,0.3,0,1,0,-1,1
Pb 4f 5/2,141.7,141.2,142.2,0.8,0.3,2.0,700,0,5000,120,0.3,0,1,0,-1,1
",
    )?;
    let rsf = RsfTable::new([("Pb 4f 7/2", 5.678), ("Pb 4f 5/2", 4.427)])?;
    let config = AnalysisConfig::default().background(BackgroundSpec::linear(
        Bounded::unbounded(0.0),
        Bounded::unbounded(0.0),
    ));

    let start = Instant::now();
    let outcome = analyze(&spectrum, &seeds, Some(&rsf), &config, None)?;
    let elapsed = Instant::now() - start;

    let Some(analysis) = outcome.completed() else {
        println!("Fit was cancelled");
        return Ok(());
    };
    println!(
        "Fit '{}' in {} ms: converged={}, iterations={}, R^2={:.6}",
        analysis.spectrum_name,
        elapsed.as_millis(),
        analysis.converged(),
        analysis.fit.iterations,
        analysis.statistics().r_squared,
    );
    for region in analysis.regions() {
        println!(
            "\t{}: center {:.3} ± {:.3}, sigma {:.3}, area {:.1}, {:.2} at%",
            region.region_id,
            region.center.value,
            region.center.stderr.unwrap_or(f64::NAN),
            region.sigma.value,
            region.area,
            region.atomic_percent.unwrap_or_default(),
        );
    }
    Ok(())
}
