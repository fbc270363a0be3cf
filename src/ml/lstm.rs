use anyhow::{anyhow, Result};
use ndarray::linalg::general_mat_mul;
use ndarray::{s, Array1, Array2, Array3, Axis, Dimension, Zip};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Layer sizes of the stacked recurrent classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub input_size: usize,
    pub lstm1_units: usize,
    pub lstm2_units: usize,
    pub dense_units: usize,
    pub dropout: f64,
}

#[derive(Debug, Clone)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
}

/// Weight matrix (rows = outputs) and bias of one layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Params {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl Params {
    fn uniform(rows: usize, cols: usize, limit: f64, rng: &mut StdRng) -> Self {
        let dist = Uniform::new_inclusive(-limit, limit);
        Self {
            weights: Array2::from_shape_fn((rows, cols), |_| dist.sample(rng)),
            bias: Array1::zeros(rows),
        }
    }

    fn zeros_like(&self) -> Self {
        Self {
            weights: Array2::zeros(self.weights.raw_dim()),
            bias: Array1::zeros(self.bias.raw_dim()),
        }
    }
}

/// LSTM layer, gates stacked as [input, forget, cell, output]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LstmLayer {
    input_size: usize,
    hidden_size: usize,
    params: Params,
}

/// Per-timestep activations kept for the backward pass
struct LstmStep {
    z: Array2<f64>,
    c_prev: Array2<f64>,
    i: Array2<f64>,
    f: Array2<f64>,
    g: Array2<f64>,
    o: Array2<f64>,
    tanh_c: Array2<f64>,
}

impl LstmLayer {
    fn new(input_size: usize, hidden_size: usize, rng: &mut StdRng) -> Self {
        let limit = (1.0 / hidden_size as f64).sqrt();
        let mut params = Params::uniform(4 * hidden_size, input_size + hidden_size, limit, rng);
        params.bias.slice_mut(s![hidden_size..2 * hidden_size]).fill(1.0);
        Self {
            input_size,
            hidden_size,
            params,
        }
    }

    /// Hidden states for every timestep of a `[batch, input]` sequence
    fn forward(&self, xs: &[Array2<f64>]) -> (Vec<Array2<f64>>, Vec<LstmStep>) {
        let h = self.hidden_size;
        let batch = xs.first().map(|x| x.nrows()).unwrap_or(0);
        let mut h_prev = Array2::<f64>::zeros((batch, h));
        let mut c_prev = Array2::<f64>::zeros((batch, h));
        let mut outputs = Vec::with_capacity(xs.len());
        let mut steps = Vec::with_capacity(xs.len());

        for x in xs {
            let mut z = Array2::<f64>::zeros((batch, self.input_size + h));
            z.slice_mut(s![.., ..self.input_size]).assign(x);
            z.slice_mut(s![.., self.input_size..]).assign(&h_prev);

            let a = z.dot(&self.params.weights.t()) + &self.params.bias;
            let i = a.slice(s![.., 0..h]).mapv(sigmoid);
            let f = a.slice(s![.., h..2 * h]).mapv(sigmoid);
            let g = a.slice(s![.., 2 * h..3 * h]).mapv(f64::tanh);
            let o = a.slice(s![.., 3 * h..]).mapv(sigmoid);

            let c = &f * &c_prev + &i * &g;
            let tanh_c = c.mapv(f64::tanh);
            let h_next = &o * &tanh_c;

            outputs.push(h_next.clone());
            steps.push(LstmStep {
                z,
                c_prev: std::mem::replace(&mut c_prev, c),
                i,
                f,
                g,
                o,
                tanh_c,
            });
            h_prev = h_next;
        }

        (outputs, steps)
    }

    /// Backpropagation through time. `dhs[t]` is the loss gradient w.r.t. the
    /// layer output at step t; returns gradients w.r.t. the layer inputs.
    fn backward(&self, steps: &[LstmStep], dhs: &[Array2<f64>], grads: &mut Params) -> Vec<Array2<f64>> {
        let h = self.hidden_size;
        let batch = dhs.first().map(|d| d.nrows()).unwrap_or(0);
        let mut dh_next = Array2::<f64>::zeros((batch, h));
        let mut dc_next = Array2::<f64>::zeros((batch, h));
        let mut dxs = vec![Array2::<f64>::zeros((batch, self.input_size)); steps.len()];

        for t in (0..steps.len()).rev() {
            let step = &steps[t];
            let dh = &dhs[t] + &dh_next;

            let d_o = &dh * &step.tanh_c;
            let dc = &dh * &step.o * &step.tanh_c.mapv(|v| 1.0 - v * v) + &dc_next;
            let di = &dc * &step.g;
            let df = &dc * &step.c_prev;
            let dg = &dc * &step.i;
            dc_next = &dc * &step.f;

            let mut da = Array2::<f64>::zeros((batch, 4 * h));
            da.slice_mut(s![.., 0..h]).assign(&(di * step.i.mapv(|v| v * (1.0 - v))));
            da.slice_mut(s![.., h..2 * h]).assign(&(df * step.f.mapv(|v| v * (1.0 - v))));
            da.slice_mut(s![.., 2 * h..3 * h]).assign(&(dg * step.g.mapv(|v| 1.0 - v * v)));
            da.slice_mut(s![.., 3 * h..]).assign(&(d_o * step.o.mapv(|v| v * (1.0 - v))));

            general_mat_mul(1.0, &da.t(), &step.z, 1.0, &mut grads.weights);
            grads.bias += &da.sum_axis(Axis(0));

            let dz = da.dot(&self.params.weights);
            dxs[t] = dz.slice(s![.., ..self.input_size]).to_owned();
            dh_next = dz.slice(s![.., self.input_size..]).to_owned();
        }

        dxs
    }
}

/// Fully connected layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Dense {
    params: Params,
}

impl Dense {
    fn new(input_size: usize, output_size: usize, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (input_size + output_size) as f64).sqrt();
        Self {
            params: Params::uniform(output_size, input_size, limit, rng),
        }
    }

    fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        x.dot(&self.params.weights.t()) + &self.params.bias
    }

    fn backward(&self, x: &Array2<f64>, dy: &Array2<f64>, grads: &mut Params) -> Array2<f64> {
        general_mat_mul(1.0, &dy.t(), x, 1.0, &mut grads.weights);
        grads.bias += &dy.sum_axis(Axis(0));
        dy.dot(&self.params.weights)
    }
}

/// Activations of one forward pass over a batch
struct Pass {
    steps1: Vec<LstmStep>,
    steps2: Vec<LstmStep>,
    masks1: Vec<Array2<f64>>,
    mask2: Array2<f64>,
    dense_in: Array2<f64>,
    dense_pre: Array2<f64>,
    dense_out: Array2<f64>,
    probs: Array1<f64>,
}

/// Binary sequence classifier: LSTM -> dropout -> LSTM -> dropout -> dense(relu) -> sigmoid.
///
/// Input is `[samples, timesteps, features]`; the output is the probability
/// that the next close is higher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceClassifier {
    pub config: ClassifierConfig,
    lstm1: LstmLayer,
    lstm2: LstmLayer,
    dense: Dense,
    output: Dense,
}

impl SequenceClassifier {
    pub fn new(config: ClassifierConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let lstm1 = LstmLayer::new(config.input_size, config.lstm1_units, &mut rng);
        let lstm2 = LstmLayer::new(config.lstm1_units, config.lstm2_units, &mut rng);
        let dense = Dense::new(config.lstm2_units, config.dense_units, &mut rng);
        let output = Dense::new(config.dense_units, 1, &mut rng);
        Self {
            config,
            lstm1,
            lstm2,
            dense,
            output,
        }
    }

    pub fn input_size(&self) -> usize {
        self.config.input_size
    }

    fn check_input(&self, x: &Array3<f64>) -> Result<()> {
        let (_, timesteps, width) = x.dim();
        if timesteps == 0 {
            return Err(anyhow!("Sequence length must be at least 1"));
        }
        if width != self.config.input_size {
            return Err(anyhow!(
                "Classifier expects {} features per step, got {}",
                self.config.input_size,
                width
            ));
        }
        Ok(())
    }

    fn forward(&self, x: &Array3<f64>, mut dropout: Option<&mut StdRng>) -> Pass {
        let timesteps = x.dim().1;
        let xs: Vec<Array2<f64>> = (0..timesteps).map(|t| x.index_axis(Axis(1), t).to_owned()).collect();
        let rate = self.config.dropout;

        let (h1, steps1) = self.lstm1.forward(&xs);
        let masks1: Vec<Array2<f64>> = h1
            .iter()
            .map(|h| dropout_mask(h.raw_dim(), rate, dropout.as_deref_mut()))
            .collect();
        let x2: Vec<Array2<f64>> = h1.iter().zip(&masks1).map(|(h, m)| h * m).collect();

        let (h2, steps2) = self.lstm2.forward(&x2);
        let last = h2
            .last()
            .cloned()
            .unwrap_or_else(|| Array2::zeros((x.dim().0, self.config.lstm2_units)));
        let mask2 = dropout_mask(last.raw_dim(), rate, dropout.as_deref_mut());
        let dense_in = &last * &mask2;

        let dense_pre = self.dense.forward(&dense_in);
        let dense_out = dense_pre.mapv(|v| v.max(0.0));
        let logits = self.output.forward(&dense_out);
        let probs = logits.column(0).mapv(sigmoid);

        Pass {
            steps1,
            steps2,
            masks1,
            mask2,
            dense_in,
            dense_pre,
            dense_out,
            probs,
        }
    }

    /// Gradients of the mean binary cross-entropy over the batch
    fn backward(&self, pass: &Pass, labels: &[f64]) -> [Params; 4] {
        let batch = labels.len();
        let mut grads = [
            self.lstm1.params.zeros_like(),
            self.lstm2.params.zeros_like(),
            self.dense.params.zeros_like(),
            self.output.params.zeros_like(),
        ];
        let [g1, g2, gd, go] = &mut grads;

        let dlogits = Array2::from_shape_fn((batch, 1), |(b, _)| (pass.probs[b] - labels[b]) / batch as f64);
        let d_dense_out = self.output.backward(&pass.dense_out, &dlogits, go);
        let d_dense_pre = d_dense_out * pass.dense_pre.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        let d_dense_in = self.dense.backward(&pass.dense_in, &d_dense_pre, gd);

        let timesteps = pass.steps2.len();
        let mut dh2 = vec![Array2::<f64>::zeros((batch, self.config.lstm2_units)); timesteps];
        if let Some(last) = dh2.last_mut() {
            *last = d_dense_in * &pass.mask2;
        }
        let dx2 = self.lstm2.backward(&pass.steps2, &dh2, g2);

        let dh1: Vec<Array2<f64>> = dx2.iter().zip(&pass.masks1).map(|(d, m)| d * m).collect();
        self.lstm1.backward(&pass.steps1, &dh1, g1);

        grads
    }

    fn params_mut(&mut self) -> [&mut Params; 4] {
        [
            &mut self.lstm1.params,
            &mut self.lstm2.params,
            &mut self.dense.params,
            &mut self.output.params,
        ]
    }

    /// Mini-batch Adam on binary cross-entropy. Sample order is shuffled
    /// inside the given (already chronologically split) training set.
    /// Returns the mean training loss per epoch.
    pub fn fit(&mut self, x: &Array3<f64>, y: &[f64], options: &FitOptions) -> Result<Vec<f64>> {
        self.check_input(x)?;
        let n = x.dim().0;
        if n == 0 || n != y.len() {
            return Err(anyhow!("Training set has {} samples and {} labels", n, y.len()));
        }

        let mut rng = StdRng::seed_from_u64(options.seed);
        let mut adam = Adam::new(options.learning_rate, &self.params_mut());
        let batch_size = options.batch_size.max(1);
        let mut indices: Vec<usize> = (0..n).collect();
        let mut history = Vec::with_capacity(options.epochs);

        for epoch in 0..options.epochs {
            indices.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for batch in indices.chunks(batch_size) {
                let xb = x.select(Axis(0), batch);
                let yb: Vec<f64> = batch.iter().map(|&i| y[i]).collect();

                let pass = self.forward(&xb, Some(&mut rng));
                epoch_loss += binary_cross_entropy(&pass.probs, &yb) * batch.len() as f64;

                let grads = self.backward(&pass, &yb);
                adam.step(&mut self.params_mut(), &grads);
            }

            let mean_loss = epoch_loss / n as f64;
            debug!("epoch {}/{}: loss {:.4}", epoch + 1, options.epochs, mean_loss);
            history.push(mean_loss);
        }

        Ok(history)
    }

    /// Up-probabilities, dropout disabled
    pub fn predict_proba(&self, x: &Array3<f64>) -> Result<Array1<f64>> {
        self.check_input(x)?;
        Ok(self.forward(x, None).probs)
    }

    /// Up-probability for a single already-scaled feature vector (one timestep)
    pub fn predict_one(&self, features: &[f64]) -> Result<f64> {
        let x = Array3::from_shape_vec((1, 1, features.len()), features.to_vec())?;
        let probs = self.predict_proba(&x)?;
        probs.get(0).copied().ok_or_else(|| anyhow!("Classifier produced no output"))
    }

    pub fn evaluate(&self, x: &Array3<f64>, y: &[f64]) -> Result<Evaluation> {
        let probs = self.predict_proba(x)?;
        if probs.len() != y.len() || y.is_empty() {
            return Err(anyhow!("Evaluation set has {} samples and {} labels", probs.len(), y.len()));
        }
        let correct = probs
            .iter()
            .zip(y)
            .filter(|(p, label)| (**p >= 0.5) == (**label >= 0.5))
            .count();
        Ok(Evaluation {
            loss: binary_cross_entropy(&probs, y),
            accuracy: correct as f64 / y.len() as f64,
        })
    }

    /// Classifier that ignores its input and always answers `p_up`
    #[cfg(test)]
    pub(crate) fn constant(input_size: usize, p_up: f64) -> Self {
        let config = ClassifierConfig {
            input_size,
            lstm1_units: 4,
            lstm2_units: 4,
            dense_units: 4,
            dropout: 0.0,
        };
        let mut model = Self::new(config, 0);
        for params in model.params_mut() {
            params.weights.fill(0.0);
            params.bias.fill(0.0);
        }
        model.output.params.bias[0] = (p_up / (1.0 - p_up)).ln();
        model
    }
}

/// Adam with Keras defaults
struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    t: i32,
    m: Vec<Params>,
    v: Vec<Params>,
}

impl Adam {
    fn new(learning_rate: f64, params: &[&mut Params]) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            t: 0,
            m: params.iter().map(|p| p.zeros_like()).collect(),
            v: params.iter().map(|p| p.zeros_like()).collect(),
        }
    }

    fn step(&mut self, params: &mut [&mut Params], grads: &[Params]) {
        self.t += 1;
        let lr_t = self.learning_rate * (1.0 - self.beta2.powi(self.t)).sqrt() / (1.0 - self.beta1.powi(self.t));
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);

        for (k, param) in params.iter_mut().enumerate() {
            adam_update(&mut param.weights, &grads[k].weights, &mut self.m[k].weights, &mut self.v[k].weights, lr_t, b1, b2, eps);
            adam_update(&mut param.bias, &grads[k].bias, &mut self.m[k].bias, &mut self.v[k].bias, lr_t, b1, b2, eps);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn adam_update<D: Dimension>(
    param: &mut ndarray::Array<f64, D>,
    grad: &ndarray::Array<f64, D>,
    m: &mut ndarray::Array<f64, D>,
    v: &mut ndarray::Array<f64, D>,
    lr_t: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
) {
    Zip::from(param).and(grad).and(m).and(v).for_each(|p, &g, m, v| {
        *m = beta1 * *m + (1.0 - beta1) * g;
        *v = beta2 * *v + (1.0 - beta2) * g * g;
        *p -= lr_t * *m / (v.sqrt() + epsilon);
    });
}

/// Inverted dropout: kept units are scaled by `1 / (1 - rate)`
fn dropout_mask(dim: ndarray::Ix2, rate: f64, rng: Option<&mut StdRng>) -> Array2<f64> {
    match rng {
        Some(rng) if rate > 0.0 && rate < 1.0 => {
            let keep = 1.0 / (1.0 - rate);
            Array2::from_shape_fn(dim, |_| if rng.gen::<f64>() < rate { 0.0 } else { keep })
        }
        _ => Array2::ones(dim),
    }
}

fn binary_cross_entropy(probs: &Array1<f64>, labels: &[f64]) -> f64 {
    const EPS: f64 = 1e-7;
    let total: f64 = probs
        .iter()
        .zip(labels)
        .map(|(p, y)| {
            let p = p.clamp(EPS, 1.0 - EPS);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / labels.len().max(1) as f64
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
