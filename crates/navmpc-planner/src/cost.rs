//! Penalized NMPC cost
//!
//! Evaluates the cost of a decision vector `u` against a parameter vector
//! `p` laid out by [`ParameterLayout`], and its exact gradient.
//!
//! Per step `k = 0..N-1`, with `s_{k+1} = f(s_k, u_k)` and reference `r_k`:
//!
//! ```text
//! l_k = w_v·v_k² + w_ω·ω_k²
//!     + w_av·((v_k - v_{k-1})/ts)² + w_aω·((ω_k - ω_{k-1})/ts)²
//!     + w_vel·(v_k - v_ref,k)²
//!     + w_pos·‖p_{k+1} - r_k‖² + w_θ·2(1 - cos(θ_{k+1} - θ_ref,k))
//!     + w_path·dist²(p_{k+1}, reference polyline)
//!     + w_stc·Σ_slots Π_edges max(0, d - n·p_{k+1})²
//!     + w_dyn·Σ_slots α·max(0, 1 - q_k(p_{k+1}))²
//! ```
//!
//! plus the terminal terms `w_pN·‖p_N - r_{N-1}‖² + w_θN·2(1 - cos(θ_N - θ_ref,N-1))`.
//!
//! The gradient is computed with one forward rollout and one backward
//! (adjoint) pass through the unicycle Jacobians.

use nalgebra::Vector3;
use navmpc_core::geometry::closest_point_on_segment;
use navmpc_core::math::{heading_error, heading_error_grad};
use navmpc_core::{Control, Pt2, State, UnicycleModel, Vec2};

use crate::config::{MpcConfig, PARAMS_PER_DYNAMIC, PARAMS_PER_EDGE};
use crate::problem::{ParameterLayout, ReferencePoint};

/// Cost and gradient over a fixed parameter layout
#[derive(Debug, Clone)]
pub struct CostModel {
    layout: ParameterLayout,
    model: UnicycleModel,
}

impl CostModel {
    pub fn new(config: &MpcConfig) -> Self {
        Self::from_layout(ParameterLayout::new(config), config.horizon.ts)
    }

    pub fn from_layout(layout: ParameterLayout, ts: f64) -> Self {
        Self {
            layout,
            model: UnicycleModel::new(ts),
        }
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    /// Predicted states `s_0..=s_N` for decision vector `u`
    pub fn rollout(&self, p: &[f64], u: &[f64]) -> Vec<State> {
        let view = ParamView::new(&self.layout, p);
        self.model
            .rollout(&view.initial_state(), &Control::sequence_from_slice(u))
    }

    pub fn cost(&self, p: &[f64], u: &[f64]) -> f64 {
        self.evaluate(p, u, None)
    }

    /// Writes `∂J/∂u` into `grad` and returns `J`
    pub fn cost_and_gradient(&self, p: &[f64], u: &[f64], grad: &mut [f64]) -> f64 {
        self.evaluate(p, u, Some(grad))
    }

    pub fn gradient(&self, p: &[f64], u: &[f64], grad: &mut [f64]) {
        self.evaluate(p, u, Some(grad));
    }

    /// Weighted static plus dynamic obstacle penalty along the rollout of `u`
    pub fn avoidance_penalty(&self, p: &[f64], u: &[f64]) -> f64 {
        let view = ParamView::new(&self.layout, p);
        let w = view.weights();
        let states = self.rollout(p, u);
        states
            .iter()
            .skip(1)
            .enumerate()
            .map(|(k, s)| {
                let pos = s.position();
                w.static_obstacle * self.static_penalty(&view, &pos).0
                    + w.dynamic_obstacle * self.dynamic_penalty(&view, k, &pos).0
            })
            .sum()
    }

    fn evaluate(&self, p: &[f64], u: &[f64], grad: Option<&mut [f64]>) -> f64 {
        let n = self.layout.n_hor;
        let ts = self.model.ts;
        let view = ParamView::new(&self.layout, p);
        let w = view.weights();

        let controls = Control::sequence_from_slice(u);
        let states = self.model.rollout(&view.initial_state(), &controls);
        let refs: Vec<ReferencePoint> = (0..n).map(|k| view.reference(k)).collect();
        let path: Vec<Pt2> = refs.iter().map(|r| Pt2::new(r.x, r.y)).collect();

        let mut total = 0.0;
        let mut state_grads = vec![Vector3::<f64>::zeros(); n + 1];
        let mut control_grads = vec![[0.0_f64; 2]; n];
        let mut prev = view.previous_control();

        for k in 0..n {
            let c = controls[k];
            let r = &refs[k];

            let acc_v = (c.v - prev.v) / ts;
            let acc_w = (c.omega - prev.omega) / ts;
            let speed_err = c.v - r.speed;
            total += w.lin_vel * c.v * c.v
                + w.ang_vel * c.omega * c.omega
                + w.lin_acc * acc_v * acc_v
                + w.ang_acc * acc_w * acc_w
                + w.velocity * speed_err * speed_err;

            control_grads[k][0] += 2.0 * (w.lin_vel * c.v + w.lin_acc * acc_v / ts + w.velocity * speed_err);
            control_grads[k][1] += 2.0 * (w.ang_vel * c.omega + w.ang_acc * acc_w / ts);
            if k > 0 {
                control_grads[k - 1][0] -= 2.0 * w.lin_acc * acc_v / ts;
                control_grads[k - 1][1] -= 2.0 * w.ang_acc * acc_w / ts;
            }
            prev = c;

            let s = &states[k + 1];
            let pos = s.position();
            let mut g = Vec2::zeros();

            let e = pos - Pt2::new(r.x, r.y);
            total += w.position * e.norm_squared();
            g += 2.0 * w.position * e;

            total += w.heading * heading_error(s.theta, r.theta);
            let g_theta = w.heading * heading_error_grad(s.theta, r.theta);

            let (dev, dev_grad) = path_deviation(&path, &pos);
            total += w.path_deviation * dev;
            g += w.path_deviation * dev_grad;

            let (stc, stc_grad) = self.static_penalty(&view, &pos);
            total += w.static_obstacle * stc;
            g += w.static_obstacle * stc_grad;

            let (dynp, dyn_grad) = self.dynamic_penalty(&view, k, &pos);
            total += w.dynamic_obstacle * dynp;
            g += w.dynamic_obstacle * dyn_grad;

            state_grads[k + 1] += Vector3::new(g.x, g.y, g_theta);
        }

        // Terminal
        let s_n = &states[n];
        let r_n = &refs[n - 1];
        let e = s_n.position() - Pt2::new(r_n.x, r_n.y);
        total += w.terminal_position * e.norm_squared()
            + w.terminal_heading * heading_error(s_n.theta, r_n.theta);
        state_grads[n] += Vector3::new(
            2.0 * w.terminal_position * e.x,
            2.0 * w.terminal_position * e.y,
            w.terminal_heading * heading_error_grad(s_n.theta, r_n.theta),
        );

        if let Some(grad) = grad {
            let mut lambda = state_grads[n];
            for k in (0..n).rev() {
                let bt_lambda = self.model.control_jacobian(&states[k]).transpose() * lambda;
                grad[2 * k] = control_grads[k][0] + bt_lambda[0];
                grad[2 * k + 1] = control_grads[k][1] + bt_lambda[1];
                if k > 0 {
                    let a = self.model.state_jacobian(&states[k], &controls[k]);
                    lambda = state_grads[k] + a.transpose() * lambda;
                }
            }
        }

        total
    }

    /// Unweighted static penalty and its gradient at `pos`
    fn static_penalty(&self, view: &ParamView<'_>, pos: &Pt2) -> (f64, Vec2) {
        let mut value = 0.0;
        let mut grad = Vec2::zeros();
        for slot in 0..self.layout.n_stcobs {
            let rows = view.static_slot(slot);
            let depths: Vec<f64> = rows
                .chunks_exact(PARAMS_PER_EDGE)
                .map(|row| row[2] - (row[0] * pos.x + row[1] * pos.y))
                .collect();
            if depths.iter().any(|h| *h <= 0.0) {
                continue;
            }

            let product: f64 = depths.iter().map(|h| h * h).product();
            value += product;
            for (row, h) in rows.chunks_exact(PARAMS_PER_EDGE).zip(&depths) {
                grad -= Vec2::new(row[0], row[1]) * (2.0 * product / h);
            }
        }
        (value, grad)
    }

    /// Unweighted dynamic penalty at step `k` and its gradient at `pos`
    fn dynamic_penalty(&self, view: &ParamView<'_>, k: usize, pos: &Pt2) -> (f64, Vec2) {
        let mut value = 0.0;
        let mut grad = Vec2::zeros();
        for slot in 0..self.layout.n_dynobs {
            let row = view.dynamic_row(slot, k);
            let (ox, oy, rx, ry, heading, alpha) = (row[0], row[1], row[2], row[3], row[4], row[5]);
            if alpha == 0.0 || rx <= 0.0 || ry <= 0.0 {
                continue;
            }
            let (sin, cos) = heading.sin_cos();
            let dx = pos.x - ox;
            let dy = pos.y - oy;
            let lx = cos * dx + sin * dy;
            let ly = -sin * dx + cos * dy;
            let q = lx * lx / (rx * rx) + ly * ly / (ry * ry);
            if q >= 1.0 {
                continue;
            }
            let slack = 1.0 - q;
            value += alpha * slack * slack;

            let a = 2.0 * lx / (rx * rx);
            let b = 2.0 * ly / (ry * ry);
            let grad_q = Vec2::new(cos * a - sin * b, sin * a + cos * b);
            grad -= grad_q * (2.0 * alpha * slack);
        }
        (value, grad)
    }
}

/// Squared distance from `p` to the polyline and its gradient
fn path_deviation(path: &[Pt2], p: &Pt2) -> (f64, Vec2) {
    let closest = match path {
        [] => return (0.0, Vec2::zeros()),
        [single] => *single,
        _ => path
            .windows(2)
            .map(|seg| closest_point_on_segment(p, &seg[0], &seg[1]))
            .fold((path[0], f64::INFINITY), |best, cand| if cand.1 < best.1 { cand } else { best })
            .0,
    };
    let e = p - closest;
    (e.norm_squared(), 2.0 * e)
}

#[derive(Debug, Clone, Copy)]
struct Weights {
    lin_vel: f64,
    ang_vel: f64,
    lin_acc: f64,
    ang_acc: f64,
    path_deviation: f64,
    position: f64,
    velocity: f64,
    heading: f64,
    static_obstacle: f64,
    dynamic_obstacle: f64,
    terminal_position: f64,
    terminal_heading: f64,
}

/// Typed reads from a flat parameter vector
struct ParamView<'a> {
    layout: &'a ParameterLayout,
    p: &'a [f64],
}

impl<'a> ParamView<'a> {
    fn new(layout: &'a ParameterLayout, p: &'a [f64]) -> Self {
        Self { layout, p }
    }

    fn initial_state(&self) -> State {
        let o = self.layout.state_offset();
        State::new(self.p[o], self.p[o + 1], self.p[o + 2])
    }

    fn previous_control(&self) -> Control {
        let o = self.layout.state_offset();
        Control::new(self.p[o + 3], self.p[o + 4])
    }

    fn reference(&self, k: usize) -> ReferencePoint {
        let o = self.layout.reference_offset() + k * ParameterLayout::REFERENCE_STRIDE;
        ReferencePoint::new(self.p[o], self.p[o + 1], self.p[o + 2], self.p[o + 3])
    }

    fn static_slot(&self, slot: usize) -> &'a [f64] {
        let stride = self.layout.edges_per_static * PARAMS_PER_EDGE;
        let o = self.layout.static_offset() + slot * stride;
        &self.p[o..o + stride]
    }

    fn dynamic_row(&self, slot: usize, k: usize) -> &'a [f64] {
        let o = self.layout.dynamic_offset() + (slot * self.layout.n_hor + k) * PARAMS_PER_DYNAMIC;
        &self.p[o..o + PARAMS_PER_DYNAMIC]
    }

    fn weights(&self) -> Weights {
        let w = &self.p[self.layout.weights_offset()..];
        Weights {
            lin_vel: w[0],
            ang_vel: w[1],
            lin_acc: w[2],
            ang_acc: w[3],
            path_deviation: w[4],
            position: w[5],
            velocity: w[6],
            heading: w[7],
            static_obstacle: w[8],
            dynamic_obstacle: w[9],
            terminal_position: w[10],
            terminal_heading: w[11],
        }
    }
}
