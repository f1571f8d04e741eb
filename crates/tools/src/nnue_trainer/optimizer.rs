//! オプティマイザ
//!
//! Adam を層ごとのモーメントで実装する。

use super::network::TrainableNetwork;

/// オプティマイザ trait
pub trait Optimizer {
    /// パラメータを更新
    fn step(&mut self, network: &mut TrainableNetwork);

    /// 学習率を設定
    fn set_lr(&mut self, lr: f32);

    /// 現在の学習率を取得
    fn get_lr(&self) -> f32;
}

/// 1層分のモーメント
#[derive(Clone, Debug, PartialEq)]
pub struct LayerMoments {
    pub m_weights: Vec<f32>,
    pub v_weights: Vec<f32>,
    pub m_biases: Vec<f32>,
    pub v_biases: Vec<f32>,
}

impl LayerMoments {
    pub fn zeros(weights: usize, biases: usize) -> Self {
        Self {
            m_weights: vec![0.0; weights],
            v_weights: vec![0.0; weights],
            m_biases: vec![0.0; biases],
            v_biases: vec![0.0; biases],
        }
    }
}

/// Adam オプティマイザ
#[derive(Clone, Debug, PartialEq)]
pub struct Adam {
    /// 学習率
    pub lr: f32,
    /// β1（一次モーメントの減衰率）
    pub beta1: f32,
    /// β2（二次モーメントの減衰率）
    pub beta2: f32,
    /// 数値安定性のための小さな値
    pub epsilon: f32,
    /// 重み減衰（L2）
    pub weight_decay: f32,

    /// ステップ数
    t: u64,
    moments: Vec<LayerMoments>,
}

impl Adam {
    /// 新しいAdamオプティマイザを作成
    pub fn new(network: &TrainableNetwork, lr: f32) -> Self {
        let moments = network
            .layers
            .iter()
            .map(|l| LayerMoments::zeros(l.weights.len(), l.biases.len()))
            .collect();
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.0,
            t: 0,
            moments,
        }
    }

    pub fn with_weight_decay(mut self, wd: f32) -> Self {
        self.weight_decay = wd;
        self
    }

    /// チェックポイントから復元した状態で作成
    ///
    /// モーメントの長さがネットワークと合わなければ `None`。
    pub fn from_parts(
        network: &TrainableNetwork,
        lr: f32,
        t: u64,
        moments: Vec<LayerMoments>,
    ) -> Option<Self> {
        if moments.len() != network.layers.len() {
            return None;
        }
        let fits = network.layers.iter().zip(&moments).all(|(l, m)| {
            m.m_weights.len() == l.weights.len()
                && m.v_weights.len() == l.weights.len()
                && m.m_biases.len() == l.biases.len()
                && m.v_biases.len() == l.biases.len()
        });
        fits.then(|| Self {
            t,
            moments,
            ..Self::new(network, lr)
        })
    }

    /// これまでの更新回数
    pub fn step_count(&self) -> u64 {
        self.t
    }

    pub fn moments(&self) -> &[LayerMoments] {
        &self.moments
    }
}

/// Adamの更新式を適用（借用エラー回避のため独立関数として実装）
#[allow(clippy::too_many_arguments)]
fn adam_update_params(
    params: &mut [f32],
    grads: &[f32],
    m: &mut [f32],
    v: &mut [f32],
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
    lr_t: f32,
) {
    for i in 0..params.len() {
        let g = grads[i] + weight_decay * params[i];

        m[i] = beta1 * m[i] + (1.0 - beta1) * g;
        v[i] = beta2 * v[i] + (1.0 - beta2) * g * g;

        params[i] -= lr_t * m[i] / (v[i].sqrt() + epsilon);
    }
}

impl Optimizer for Adam {
    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn get_lr(&self) -> f32 {
        self.lr
    }

    fn step(&mut self, network: &mut TrainableNetwork) {
        self.t += 1;

        // バイアス補正付き学習率
        let t = self.t.min(i32::MAX as u64) as i32;
        let lr_t = self.lr * (1.0 - self.beta2.powi(t)).sqrt() / (1.0 - self.beta1.powi(t));

        for (layer, m) in network.layers.iter_mut().zip(&mut self.moments) {
            adam_update_params(
                &mut layer.weights,
                &layer.weight_grads,
                &mut m.m_weights,
                &mut m.v_weights,
                self.beta1,
                self.beta2,
                self.epsilon,
                self.weight_decay,
                lr_t,
            );
            // バイアスには減衰を掛けない
            adam_update_params(
                &mut layer.biases,
                &layer.bias_grads,
                &mut m.m_biases,
                &mut m.v_biases,
                self.beta1,
                self.beta2,
                self.epsilon,
                0.0,
                lr_t,
            );
        }
    }
}
