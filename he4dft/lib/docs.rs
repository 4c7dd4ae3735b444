//! Theoretical background.
//!
//! # Contents
//! - [Background](#background)
//! - [Units](#units)
//! - [The Orsay-Trento functional](#the-orsay-trento-functional)
//! - [Time dependence](#time-dependence)
//! - [Boundaries and normalization](#boundaries-and-normalization)
//! - [Impurities and transport](#impurities-and-transport)
//!
//! # Background
//! Superfluid ⁴He at low temperature is described here by a single complex
//! order parameter *ψ*(**r**, *t*) whose square modulus is the number density,
//! *ρ* = |*ψ*|². In density functional theory the liquid's energy is a
//! functional *E*\[*ψ*\] and the dynamics follow from the nonlinear
//! Schrödinger-like equation
//! ```text
//!   ∂ψ      ħ²          δE_c
//! iħ -- = - -- ∇²ψ  +  ----- + V_ext ψ - μ₀ ψ
//!   ∂t      2m           δψ*
//! ```
//! where *E*<sub>c</sub> is the correlation part of the functional (everything
//! beyond the bare kinetic energy), *V*<sub>ext</sub> is an external potential
//! (e.g. from an embedded impurity) and *μ*₀ is the chemical potential of the
//! surrounding bulk liquid. Subtracting *μ*₀ makes a uniform liquid at the
//! reference density stationary rather than merely phase-rotating.
//!
//! All fields live on a uniform periodic Cartesian grid with *n*<sub>x</sub> ×
//! *n*<sub>y</sub> × *n*<sub>z</sub> points and spacing *h*. The point with
//! index *i* along an axis sits at (*i* - *n*/2) *h*, so the origin is the
//! point (*n*<sub>x</sub>/2, *n*<sub>y</sub>/2, *n*<sub>z</sub>/2).
//!
//! # Units
//! Internally everything is in Hartree atomic units (*ħ* = *m*<sub>e</sub> =
//! *e* = *a*₀ = 1). Configuration files use laboratory units (Å, K, fs, bar,
//! m/s) and are converted on load; see [`units`][crate::units] for the
//! conversion factors. The bulk property tables in [`bulk`][crate::bulk] are
//! kept in laboratory units since they are only ever compared with experiment.
//!
//! # The Orsay-Trento functional
//! The correlation energy[^1] is
//! ```text
//! E_c = ∫ ½ ρ (V_LJ * ρ) + (c₂/2) ρ ρ̄² + (c₃/3) ρ ρ̄³
//!     - C ∫ (1 - ρ̃/ρ₀s)(∇ρ)·(F * (1 - ρ̃/ρ₀s)(∇ρ))
//!     - (m/2) ∫ [ (J²/ρ)(V_J * ρ) - J·(V_J * J) ]
//! ```
//! where `*` is a convolution, `V_LJ` is a Lennard-Jones pair potential with
//! its core replaced by a quartic inside the hard-core radius *h*, `ρ̄` is the
//! density averaged over a sphere of radius *h*, `ρ̃` is the density smoothed
//! by a normalized Gaussian `F` of width *l*<sub>g</sub>, `J` is the
//! probability current and `V_J` is the backflow kernel, a sum of two
//! Gaussians. The second line (kinetic correlation) and the third (backflow)
//! can be switched off; see [`Model`][crate::functional::Model].
//!
//! Every convolution is evaluated spectrally: the fixed kernels are
//! transformed once when the functional is built, and each evaluation
//! transforms only the current density (see
//! [`convolution`][crate::convolution]). Convolutions are therefore periodic,
//! and the grid must be large enough that a feature does not interact with its
//! own periodic image.
//!
//! For a uniform liquid of density *ρ* only the first line survives, and with
//! `b = ∫ V_LJ` the bulk energy density is
//! ```text
//! ε(ρ) = ½ b ρ² + (c₂/2) ρ³ + (c₃/3) ρ⁴
//! μ(ρ) = b ρ + (3/2) c₂ ρ² + (4/3) c₃ ρ³
//! P(ρ) = ρ μ(ρ) - ε(ρ)
//! ```
//! The integral `b` is taken over the same discrete kernel used in the
//! convolutions, so that the chemical potential subtracted in the equation of
//! motion is exactly the one the discrete functional produces for a uniform
//! liquid. On very coarse or very small grids `b` may be positive, in which
//! case the liquid has no equilibrium density and
//! [`equilibrium_density`][crate::functional::BulkEos::equilibrium_density]
//! reports an error.
//!
//! # Time dependence
//! Because the potential depends on the density being propagated, a step of
//! the second-order split-step operator
//! ```text
//! U(τ, V) = exp(-i V τ/2) F⁻¹ exp(-i τ |k - k₀|²/2m) F exp(-i V τ/2)
//! ```
//! is wrapped in a predictor-corrector scheme:
//! ```text
//!     ψ(t) ──V[ψ(t)]──> V₀ ──U(τ, V₀)──> ψ̃(t + τ)
//!                                             │
//!                           V₁ <──V[ψ̃(t + τ)]─┘
//!                           │
//!     ψ(t) ──U(τ, (V₀ + V₁)/2)──> ψ(t + τ)
//! ```
//! This keeps the step second-order accurate in *τ* even though the potential
//! changes over the step. The time step *τ* may be complex: *τ* = *dt* gives
//! real-time dynamics, *τ* = -*i* *dt* relaxes toward the ground state, and a
//! ramp `τ = (x - i(1 - x)) dt` with `x` growing from 0 to 1 over a warmup
//! period lets a state relax before real-time propagation begins. See
//! [`timedep`][crate::timedep].
//!
//! A frame moving at velocity **v** relative to the liquid is handled by
//! giving the grid a frame momentum **k**₀ = *m* **v** and shifting the kinetic
//! phase to |**k** - **k**₀|². A uniform liquid at rest in the lab then has a
//! uniform phase in the moving frame, which is what makes periodic boundaries
//! compatible with flow; the velocity should be commensurate with the box (see
//! [`commensurate_velocity`][crate::simulation::commensurate_velocity]).
//!
//! # Boundaries and normalization
//! Imaginary-time steps do not conserve the norm, so after each step the
//! amplitude is rescaled according to a
//! [`NormalizationPolicy`][crate::policy::NormalizationPolicy]: either the
//! density at a reference point far from any feature is pinned to the bulk
//! value, or the total number of atoms is held fixed (optionally also moving
//! the centre of mass back to the origin during the first iterations).
//!
//! Boundaries are periodic by default. Neumann (reflecting) boundaries are
//! implemented by mirror-extending the box to twice its size before the
//! kinetic transform, which is equivalent to a cosine transform. Absorbing
//! boundaries add a smooth imaginary potential in a shell at the edge of the
//! box that damps outgoing excitations.
//!
//! # Impurities and transport
//! An impurity (an electron, or an ion) is a second amplitude with its own
//! mass, coupled to the liquid only through a pair potential `V_pair`
//! (tabulated, or of the bubble form `A₀ e^{-A₁ r} - Σ Aₙ/r²ⁿ`). Each step
//! the impurity moves in `V_pair * ρ_He` and the liquid in
//! `V_pair * ρ_imp`.
//!
//! With the liquid streaming past a fixed impurity at velocity *v* along one
//! axis, the total momentum of the liquid gives the added mass `∫ J / v`, and
//! the force `F = -∫ ρ_imp (∂V_pair * ρ_He)` gives the mobility *μ* = *v* /
//! (-*F*/*e*) and, with the normal fraction *ρ*<sub>n</sub> and viscosity *η*
//! of a temperature regime, the Stokes radius
//! ```text
//!        e
//! R = ---------
//!     c π μ ρₙ η
//! ```
//! with *c* = 4 for slip (electron) and 6 for stick (ion) boundary conditions.
//! See [`diagnostics`][crate::diagnostics].
//!
//! [^1]: F. Dalfovo, A. Lastri, L. Pricaupenko, S. Stringari, and J. Treiner,
//! "Structural and dynamical properties of superfluid helium: A
//! density-functional approach." Phys. Rev. B **52** 1193 (1995).
