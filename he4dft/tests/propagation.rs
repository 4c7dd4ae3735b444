use approx::assert_abs_diff_eq;
use num_complex::Complex64 as C64;
use he4dft::{
    bulk::BulkProperties,
    config::Config,
    diagnostics::Sampler,
    error::Error,
    grid::{ CGrid, RGrid },
    simulation::Simulation,
};

fn config(n: usize, time: &str, extra: &str) -> Config {
    config_on([n; 3], 1.5, time, extra)
}

fn config_on(dims: [usize; 3], step: f64, time: &str, extra: &str) -> Config {
    let [nx, ny, nz] = dims;
    let text = format!(r#"
        {extra}

        [grid]
        nx = {nx}
        ny = {ny}
        nz = {nz}
        step = {step:?}

        [time]
        step = 5.0
        iterations = 1
        {time}
    "#);
    Config::from_toml_str(&text).unwrap()
}

fn perturbed_liquid(sim: &Simulation, amplitude: f64) -> CGrid {
    let amp0 = sim.rho0().sqrt();
    let l = sim.shape().nx() as f64 * sim.shape().step();
    let q = 2.0 * std::f64::consts::PI / l;
    CGrid::from_fn(sim.shape(), &|x: f64, y: f64, _: f64| {
        C64::from(amp0 * (1.0 + amplitude * (q * x).sin() * (q * y).cos()))
    })
}

fn max_density_deviation(sim: &Simulation) -> f64 {
    let mut rho = RGrid::zeros(sim.shape());
    sim.helium().density(&mut rho).unwrap();
    rho.data().iter()
        .map(|r| (r - sim.rho0()).abs() / sim.rho0())
        .fold(0.0, f64::max)
}

#[test]
fn uniform_liquid_feels_no_net_potential() {
    let mut sim = Simulation::new(config(16, "", "")).unwrap();
    sim.step().unwrap();
    let mu0 = sim.mu0();
    assert!(mu0 < 0.0);
    for v in sim.helium_potential().data().iter() {
        assert!(v.norm() < 1e-9 * mu0.abs());
    }
}

#[test]
fn identical_runs_are_identical() {
    let run = || {
        let mut sim = Simulation::new(config(16, r#"mode = { kind = "ramp", warmup = 3 }"#, ""))
            .unwrap();
        let psi = perturbed_liquid(&sim, 0.05);
        sim = sim.with_helium(psi).unwrap();
        sim.run(6, |_| Ok(())).unwrap();
        sim.helium().current().data().clone()
    };
    assert_eq!(run(), run());
}

#[test]
fn real_time_conserves_particles() {
    let sim = Simulation::new(config(16, "", "")).unwrap();
    let psi = perturbed_liquid(&sim, 0.05);
    let mut sim = sim.with_helium(psi).unwrap();
    let n0 = sim.helium().norm();
    sim.run(50, |sim| sim.check_health(1e-9)).unwrap();
    assert_abs_diff_eq!(sim.helium().norm(), n0, epsilon = 1e-10 * n0);
}

#[test]
fn uniform_liquid_stays_uniform() {
    let mut sim = Simulation::new(config_on([16; 3], 1.0, "", "")).unwrap();
    let n0 = sim.helium().norm();
    sim.run(200, |_| Ok(())).unwrap();
    let deviation = max_density_deviation(&sim);
    assert!(deviation < 1e-6, "deviation {deviation}");
    assert_abs_diff_eq!(sim.helium().norm(), n0, epsilon = 1e-10 * n0);
}

#[test]
#[ignore = "long-running"]
fn uniform_liquid_stays_uniform_over_long_runs() {
    let mut sim = Simulation::new(config_on([32; 3], 1.0, "", "")).unwrap();
    let n0 = sim.helium().norm();
    sim.run(1000, |sim| {
        if sim.iteration() % 100 == 0 { sim.check_health(1e-8) } else { Ok(()) }
    }).unwrap();
    let deviation = max_density_deviation(&sim);
    assert!(deviation < 1e-6, "deviation {deviation}");
    assert_abs_diff_eq!(sim.helium().norm(), n0, epsilon = 1e-8 * n0);
}

#[test]
#[ignore = "long-running"]
fn real_time_conserves_particles_over_long_runs() {
    let sim = Simulation::new(config(32, "", "")).unwrap();
    let psi = perturbed_liquid(&sim, 0.05);
    let mut sim = sim.with_helium(psi).unwrap();
    let n0 = sim.helium().norm();
    sim.run(1000, |sim| {
        if sim.iteration() % 100 == 0 { sim.check_health(1e-8) } else { Ok(()) }
    }).unwrap();
    assert_abs_diff_eq!(sim.helium().norm(), n0, epsilon = 1e-8 * n0);
}

#[test]
fn imaginary_time_relaxes_to_bulk() {
    let extra = r#"
        [normalization]
        kind = "bulk_pinned"
    "#;
    let sim = Simulation::new(config(16, r#"mode = { kind = "imaginary" }"#, extra)).unwrap();
    let psi = perturbed_liquid(&sim, 0.05);
    let mut sim = sim.with_helium(psi).unwrap();
    let initial = max_density_deviation(&sim);
    assert!(initial > 0.05);
    sim.run(300, |sim| sim.check_health(1e-9)).unwrap();
    let reference = sim.shape().n(0) / 4;
    let rho_ref = sim.helium().current().at([reference; 3]).norm_sqr();
    assert_abs_diff_eq!(rho_ref, sim.rho0(), epsilon = 1e-12 * sim.rho0());
    let last = max_density_deviation(&sim);
    assert!(last < 0.01 && last < initial / 10.0, "deviation {initial} -> {last}");
}

#[test]
fn fixed_particle_count_holds_after_every_step() {
    let extra = r#"
        [normalization]
        kind = "fixed_particle_count"
        atoms = 1.0
        recenter_until = 5
    "#;
    let sim = Simulation::new(config(16, r#"mode = { kind = "imaginary" }"#, extra)).unwrap();
    let rho0 = sim.rho0();
    let droplet = CGrid::from_fn(sim.shape(), &|x: f64, y: f64, z: f64| {
        let r2 = (x - 1.0).powi(2) + y * y + z * z;
        C64::from((rho0 * (-r2 / 16.0).exp()).sqrt())
    });
    let mut sim = sim.with_helium(droplet).unwrap();
    sim.run(10, |sim| {
        assert_abs_diff_eq!(sim.helium().norm(), 1.0, epsilon = 1e-9);
        sim.check_health(1e-9)
    }).unwrap();
}

#[test]
fn absorbing_edges_drain_the_box() {
    let extra = r#"
        [boundary]
        kind = "absorbing"
        amplitude = 0.5
        widths = [4.5, 4.5, 4.5]
    "#;
    let mut sim = Simulation::new(config(16, "", extra)).unwrap();
    let n0 = sim.helium().norm();
    sim.run(3, |sim| sim.check_health(1e-12)).unwrap();
    assert!(sim.helium().norm() < 0.9 * n0);
    let centre = sim.helium().current().at(sim.shape().center()).norm_sqr();
    assert_abs_diff_eq!(centre, sim.rho0(), epsilon = 1e-2 * sim.rho0());
}

// norm of the liquid within |x| < 8
fn interior_norm(sim: &Simulation) -> f64 {
    let shape = sim.shape();
    let psi = sim.helium().current();
    let inside: f64
        = psi.data().indexed_iter()
        .filter(|((i, _, _), _)| shape.coord(0, *i).abs() < 8.0)
        .map(|(_, p)| p.norm_sqr())
        .sum();
    inside * shape.dv()
}

#[test]
fn absorbing_edges_swallow_outgoing_packets() {
    // a dilute packet moving along x at about 0.57 Bohr per step
    let time = r#"
        [time]
        step = 50.0
        iterations = 1
        mode = { kind = "real" }
    "#;
    let build = |boundary: &str| {
        let text = format!(r#"
            {boundary}
            [grid]
            nx = 64
            ny = 8
            nz = 8
            step = 1.0
            {time}
        "#);
        let sim = Simulation::new(Config::from_toml_str(&text).unwrap()).unwrap();
        let packet = CGrid::from_fn(sim.shape(), &|x: f64, _: f64, _: f64| {
            1e-4 * (-(x + 4.0).powi(2) / 32.0).exp() * C64::cis(2.0 * x)
        });
        sim.with_helium(packet).unwrap()
    };
    let mut periodic = build("");
    let mut absorbing = build(r#"
        [boundary]
        kind = "absorbing"
        amplitude = 0.5
        widths = [12.0, 0.0, 0.0]
    "#);
    let n0 = periodic.helium().norm();

    // before the packet reaches the shell the interior evolves identically
    periodic.run(10, |_| Ok(())).unwrap();
    absorbing.run(10, |_| Ok(())).unwrap();
    let mut rho_p = RGrid::zeros(periodic.shape());
    let mut rho_a = RGrid::zeros(absorbing.shape());
    periodic.helium().density(&mut rho_p).unwrap();
    absorbing.helium().density(&mut rho_a).unwrap();
    let peak = rho_p.max();
    for (((i, _, _), p), a) in rho_p.data().indexed_iter().zip(rho_a.data()) {
        if periodic.shape().coord(0, i).abs() < 8.0 {
            assert_abs_diff_eq!(*p, *a, epsilon = 1e-4 * peak);
        }
    }

    // after one crossing of the box the periodic packet is back in the
    // interior while the absorbed one is gone
    periodic.run(110, |_| Ok(())).unwrap();
    absorbing.run(110, |_| Ok(())).unwrap();
    let back = interior_norm(&periodic);
    let reflected = interior_norm(&absorbing);
    assert!(back > 0.3 * n0, "periodic interior {back} of {n0}");
    assert!(reflected < 1e-2 * back, "absorbing interior {reflected} vs {back}");
    assert!(absorbing.helium().norm() < 0.05 * n0);
}

#[test]
fn norm_drift_is_reported() {
    let mut sim = Simulation::new(config(8, "", "")).unwrap();
    sim.step().unwrap();
    let mut psi = sim.helium().current().clone();
    psi.scale(1.01);
    let sim = sim.with_helium(psi).unwrap();
    // replacing the amplitude resets the reference
    sim.check_health(1e-9).unwrap();
    let mut broken = sim.helium().current().clone();
    broken.data_mut()[[1, 2, 3]] = C64::new(f64::NAN, 0.0);
    let sim = sim.with_helium(broken).unwrap();
    assert!(matches!(sim.check_health(1e-9), Err(Error::NanOrInf(_))));
}

#[test]
fn sampler_reports_bulk_energy_for_uniform_liquid() {
    let mut sim = Simulation::new(config(16, "", "")).unwrap();
    let mut sampler = Sampler::new(&sim, 2).unwrap();
    sim.run(2, |_| Ok(())).unwrap();
    assert!(sampler.is_due(sim.iteration()));
    let sample = sampler.sample(&sim).unwrap();
    assert_eq!(sample.iteration, 2);
    assert_abs_diff_eq!(sample.kinetic, 0.0, epsilon = 1e-12 * sample.functional.abs());
    assert_abs_diff_eq!(sample.relative_energy, 0.0, epsilon = 1e-9 * sample.functional.abs());
    let energy = sim.helium_energy().unwrap();
    assert_abs_diff_eq!(energy, sample.total_energy(), epsilon = 1e-9 * energy.abs());
}

#[test]
fn bulk_tables_invert() {
    // cubic B-spline coefficients at the Greville abscissae reproduce f(t) = t
    let linear = r#"
        knots = [0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 3.0, 3.0, 3.0]
        coeffs = [0.0, 0.3333333333333333, 1.0, 2.0, 2.6666666666666667, 3.0]
    "#;
    let doc = format!(
        "[enthalpy]\n{linear}\n[entropy]\n{linear}\n[dispersion]\n{linear}\n\
        [superfluid_fraction]\n{linear}\n"
    );
    let props = BulkProperties::from_toml_str(&doc).unwrap();
    let h = props.enthalpy(1.25);
    assert_abs_diff_eq!(h.value, 1.25, epsilon = 1e-12);
    assert_abs_diff_eq!(h.first, 1.0, epsilon = 1e-12);
    let t = props.enthalpy_inverse(1.5, 1e-4).unwrap();
    assert_abs_diff_eq!(t, 1.5, epsilon = 2e-4);
    assert!(props.entropy(3.5).is_sentinel());
    assert!(props.entropy_inverse(7.0, 1e-3).is_err());
}

#[test]
fn measured_superfluid_fraction_sets_normal_fraction() {
    let linear = r#"
        knots = [0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 3.0, 3.0, 3.0]
        coeffs = [0.0, 0.3333333333333333, 1.0, 2.0, 2.6666666666666667, 3.0]
    "#;
    let flat = r#"
        knots = [0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 3.0, 3.0, 3.0]
        coeffs = [0.5, 0.5, 0.5, 0.5, 0.5, 0.5]
    "#;
    let doc = format!(
        "[enthalpy]\n{linear}\n[entropy]\n{linear}\n[dispersion]\n{linear}\n\
        [superfluid_fraction]\n{flat}\n"
    );
    let path = std::env::temp_dir()
        .join(format!("he4dft-bulk-{}.toml", std::process::id()));
    std::fs::write(&path, &doc).unwrap();
    let props = BulkProperties::load(&path).unwrap();

    let extra = format!(
        "regime = \"T1600mK\"\n[liquid]\nbulk_tables = {:?}\n",
        path.display().to_string(),
    );
    let sim = Simulation::new(config(8, "", &extra)).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(sim.bulk_properties(), Some(&props));
    let sampler = Sampler::new(&sim, 1).unwrap();
    let regime = sampler.regime().unwrap();
    assert_abs_diff_eq!(regime.normal_fraction, 1.0 - props.superfluid_fraction(1.6),
        epsilon = 1e-12);
    assert!((regime.normal_fraction - 0.171).abs() > 1e-3);
    assert_eq!(regime.temperature, 1.6);

    let missing = format!(
        "[liquid]\nbulk_tables = {:?}\n",
        path.with_extension("absent").display().to_string(),
    );
    assert!(Simulation::new(config(8, "", &missing)).is_err());
}

#[test]
fn enforced_vortex_empties_its_core() {
    let extra = r#"
        [normalization]
        kind = "bulk_pinned"

        [vortex]
        kind = "enforced"
        axis = 2
    "#;
    let mut sim = Simulation::new(config(16, r#"mode = { kind = "imaginary" }"#, extra))
        .unwrap();
    sim.run(300, |sim| sim.check_health(1e-9)).unwrap();
    let rho0 = sim.rho0();
    let c = sim.shape().center();
    let core = sim.helium().current().at(c).norm_sqr();
    assert!(core < 0.97 * rho0, "core density {core} vs {rho0}");
    // the line is uniform along its axis
    for k in 0..16 {
        let rho = sim.helium().current().at([c[0], c[1], k]).norm_sqr();
        assert_abs_diff_eq!(rho, core, epsilon = 1e-9 * rho0);
    }
}

#[test]
fn imprinted_vortex_keeps_its_circulation() {
    let extra = r#"
        [vortex]
        kind = "line"
        axis = 2
    "#;
    let mut sim = Simulation::new(config(16, "", extra)).unwrap();
    let mut sampler = Sampler::new(&sim, 1).unwrap();
    let first = sampler.sample(&sim).unwrap();
    assert_abs_diff_eq!(first.winding[2], 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(first.winding[0], 0.0, epsilon = 1e-9);
    sim.run(3, |_| Ok(())).unwrap();
    let later = sampler.sample(&sim).unwrap();
    assert_abs_diff_eq!(later.winding[2], 1.0, epsilon = 1e-9);
}
