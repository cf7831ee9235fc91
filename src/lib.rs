#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]

//! The crate `mcvegas` provides adaptive importance sampling [Monte Carlo
//! integration] routines together with acceptance-rejection event generation.
//! It approximates definite multi-dimensional [integrals] with a VEGAS-style
//! separable grid that adapts to the integrand, and can afterwards draw
//! weighted or unweighted samples distributed according to the integrand from
//! the adapted grid.
//!
//! # Features
//!
//! This library was designed with the following features as essential in mind:
//!
//! - **Adaptive importance sampling**. Every dimension of the integration
//! region carries its own bin grid whose edges move towards the regions where
//! the integrand contributes most, which reduces the variance of the estimate
//! without any knowledge about the integrand beyond its evaluations.
//! - **Generic random number generator**. Every random number generator that
//! implements the `Rng` trait from the `rand` crate can be used with every
//! integrator in this crate.
//! - **Reproducibility**. All results are completely reproducible, in the
//! sense that they only depend on the used random number generator and the
//! chosen seed. In particular, the results do not depend on the number of
//! cores the integrator was started with or how the work is distributed on
//! different cores.
//! - **Non-finite number filtering**. The integrators filter out non-finite
//! numbers such as `inf` or `nan`, which integrands sometimes produce in
//! extreme regions of their integration domain due to finite numerical
//! precision. When this happens the result of the corresponding call is set
//! to zero to not destroy the integration and a counter is increased that
//! keeps track of how often this happened.
//! - **Zero tracking**. If your integrand returns zero, another counter will
//! be increased to keep track of the efficiency of the integration.
//! - **Convergence control**. Iteration estimates are combined weighted by
//! their inverse variance, and a chi-square per degree of freedom over the
//! iterations measures whether they are statistically compatible. Runs whose
//! chi-square runs away are restarted automatically with a larger sample
//! size, a bounded number of times.
//! - **Event generation**. Once the grid has adapted, the same instance can
//! draw events distributed according to the integrand, either carrying their
//! weight or unweighted by hit-or-miss against the maximum weight observed
//! during integration.
//!
//! # What is ...?
//!
//! This section is a dictionary of terms that are used in this documentation.
//! Given
//!
//! $$ I = \int_{a_1}^{b_1} \mathrm{d} x_1 \cdots \int_{a_d}^{b_d} \mathrm{d}
//! x_d \\, f(x_1, x_2, \ldots, x_d) $$
//!
//! we approximate $I$ using importance sampling with
//!
//! $$ I \approx \frac{1}{N} \sum_{j=1}^N \frac{f \left( \vec{x}^{(j)}
//! \right)}{p \left( \vec{x}^{(j)} \right)} $$
//!
//! where the points $\vec{x}^{(j)}$ are distributed with the separable
//! density $p$ encoded in the grid. We use the following terms:
//!
//! - the number of *calls* or the *sample size*, NCALL, is $N$, the number of
//! times the integrand is evaluated per iteration. We assume that this is the
//! expensive operation;
//! - the *integrand* is the function, $f(x_1, x_2, \ldots, x_d)$, that is
//! being integrated. It receives the inverse density $1 / p$ of each point as
//! its *importance weight* and returns the full weight of the point;
//! - an *iteration* is one pass of $N$ calls over the region, after which the
//! grid is refined and the statistics are folded into the global estimate;
//! - the number of *dimensions*, $d$, is the number of dimensions of the
//! integration domain;
//! - the *integral* is the (approximated) numeric value of the integral $I$;
//! - *efficiency* is the ratio of generated events to acceptance trials. A
//! small efficiency means the grid describes the integrand poorly and event
//! generation spends most of its evaluations on rejected samples;
//! - the *overflow* counter records unweighted-mode samples whose weight
//! exceeded the maximum recorded during integration. A large overflow
//! fraction means the maximum was underestimated and the unweighted sample is
//! biased.
//!
//! [Monte Carlo integration]: https://en.wikipedia.org/wiki/Monte_Carlo_integration
//! [integrals]: https://en.wikipedia.org/wiki/Integral

pub mod callbacks;
pub mod core;
pub mod error;
pub mod events;
pub mod grid;
pub mod integrators;

pub use crate::core::*;
pub use crate::error::Error;
