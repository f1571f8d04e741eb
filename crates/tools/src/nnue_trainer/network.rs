//! 学習可能な全結合ネットワーク
//!
//! `[768, hidden..., 1]` の多層パーセプトロンを f32 で実装し、
//! 順伝播・逆伝播をサポートする。第1層は疎な特徴量入力を直接受ける。

use rand::Rng;
use sunset_core::export::{ParameterTensor, WeightArtifact};
use sunset_core::{FEATURE_DIM, FeatureVector};

/// 出力次元（評価値1つ）
pub const OUTPUT_DIMENSIONS: usize = 1;

/// 学習可能なアフィン変換層
#[derive(Clone, Debug, PartialEq)]
pub struct TrainableLinear {
    pub input_dim: usize,
    pub output_dim: usize,
    /// 重み [output][input]（行優先）
    pub weights: Vec<f32>,
    /// バイアス [output]
    pub biases: Vec<f32>,
    /// 重みの勾配
    pub weight_grads: Vec<f32>,
    /// バイアスの勾配
    pub bias_grads: Vec<f32>,
}

impl TrainableLinear {
    /// 新しい層を作成（ゼロ初期化）
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            weights: vec![0.0; output_dim * input_dim],
            biases: vec![0.0; output_dim],
            weight_grads: vec![0.0; output_dim * input_dim],
            bias_grads: vec![0.0; output_dim],
        }
    }

    /// He初期化（一様分布 ±sqrt(2/fan_in)）
    pub fn init_he<R: Rng>(&mut self, rng: &mut R) {
        let bound = (2.0 / self.input_dim.max(1) as f32).sqrt();
        for w in &mut self.weights {
            *w = rng.random::<f32>() * 2.0 * bound - bound;
        }
        self.biases.fill(0.0);
    }

    /// 順伝播（密入力）
    pub fn forward(&self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), self.input_dim);
        debug_assert_eq!(output.len(), self.output_dim);

        for (j, out) in output.iter_mut().enumerate() {
            let row = &self.weights[j * self.input_dim..(j + 1) * self.input_dim];
            *out = self.biases[j] + row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>();
        }
    }

    /// 順伝播（疎入力、値が 1.0 の特徴量インデックスのみ）
    pub fn forward_sparse(&self, active: &[usize], output: &mut [f32]) {
        debug_assert_eq!(output.len(), self.output_dim);

        output.copy_from_slice(&self.biases);
        for (j, out) in output.iter_mut().enumerate() {
            let row = j * self.input_dim;
            for &idx in active {
                *out += self.weights[row + idx];
            }
        }
    }

    /// 逆伝播（出力勾配から入力勾配と重み勾配を計算）
    pub fn backward(&mut self, input: &[f32], output_grad: &[f32], input_grad: &mut [f32]) {
        debug_assert_eq!(input.len(), self.input_dim);
        debug_assert_eq!(output_grad.len(), self.output_dim);
        debug_assert_eq!(input_grad.len(), self.input_dim);

        input_grad.fill(0.0);

        for (j, &grad) in output_grad.iter().enumerate() {
            self.bias_grads[j] += grad;
            let row = j * self.input_dim;
            for i in 0..self.input_dim {
                self.weight_grads[row + i] += grad * input[i];
                input_grad[i] += grad * self.weights[row + i];
            }
        }
    }

    /// 逆伝播（疎入力、入力勾配は不要）
    pub fn backward_sparse(&mut self, active: &[usize], output_grad: &[f32]) {
        debug_assert_eq!(output_grad.len(), self.output_dim);

        for (j, &grad) in output_grad.iter().enumerate() {
            self.bias_grads[j] += grad;
            let row = j * self.input_dim;
            for &idx in active {
                self.weight_grads[row + idx] += grad;
            }
        }
    }

    /// 勾配をゼロにリセット
    pub fn zero_grad(&mut self) {
        self.weight_grads.fill(0.0);
        self.bias_grads.fill(0.0);
    }

    /// パラメータ数
    pub fn param_count(&self) -> usize {
        self.weights.len() + self.biases.len()
    }
}

#[inline]
pub fn relu(x: f32) -> f32 {
    x.max(0.0)
}

#[inline]
pub fn relu_grad(x: f32) -> f32 {
    if x > 0.0 { 1.0 } else { 0.0 }
}

/// 学習可能なネットワーク
///
/// 層は宣言順に `fc0, fc1, ...` と呼ぶ。最終層以外の出力に ReLU を掛ける。
#[derive(Clone, Debug, PartialEq)]
pub struct TrainableNetwork {
    pub layers: Vec<TrainableLinear>,
}

impl TrainableNetwork {
    /// 隠れ層の幅から作成（ゼロ初期化）
    pub fn new(hidden: &[usize]) -> Self {
        let mut dims = Vec::with_capacity(hidden.len() + 2);
        dims.push(FEATURE_DIM);
        dims.extend_from_slice(hidden);
        dims.push(OUTPUT_DIMENSIONS);
        Self::from_dims(&dims)
    }

    /// 層の入出力次元列 `[in, h1, ..., out]` から作成
    pub fn from_dims(dims: &[usize]) -> Self {
        let layers = dims.windows(2).map(|w| TrainableLinear::new(w[0], w[1])).collect();
        Self { layers }
    }

    /// ランダム初期化
    pub fn init_random<R: Rng>(&mut self, rng: &mut R) {
        for layer in &mut self.layers {
            layer.init_he(rng);
        }
    }

    /// `[in, h1, ..., out]`
    pub fn dims(&self) -> Vec<usize> {
        let mut dims: Vec<usize> = self.layers.iter().map(|l| l.input_dim).collect();
        if let Some(last) = self.layers.last() {
            dims.push(last.output_dim);
        }
        dims
    }

    /// 隠れ層の幅
    pub fn hidden(&self) -> Vec<usize> {
        let dims = self.dims();
        if dims.len() <= 2 {
            return Vec::new();
        }
        dims[1..dims.len() - 1].to_vec()
    }

    /// 順伝播
    ///
    /// 評価値と逆伝播用の中間値を返す。
    pub fn forward(&self, features: &FeatureVector) -> (f32, ForwardCache) {
        let mut cache = ForwardCache {
            active: features.active_indices().collect(),
            pre: Vec::with_capacity(self.layers.len()),
            post: Vec::with_capacity(self.layers.len()),
        };

        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            let mut out = vec![0.0; layer.output_dim];
            if i == 0 {
                layer.forward_sparse(&cache.active, &mut out);
            } else {
                layer.forward(&cache.post[i - 1], &mut out);
            }
            let act = if i == last {
                out.clone()
            } else {
                out.iter().map(|&v| relu(v)).collect()
            };
            cache.pre.push(out);
            cache.post.push(act);
        }

        let output = cache.post[last][0];
        (output, cache)
    }

    /// 逆伝播（勾配は累積される）
    pub fn backward(&mut self, cache: &ForwardCache, output_grad: f32) {
        let mut grad = vec![output_grad];
        let last = self.layers.len() - 1;

        for i in (0..self.layers.len()).rev() {
            if i != last {
                for (g, &pre) in grad.iter_mut().zip(&cache.pre[i]) {
                    *g *= relu_grad(pre);
                }
            }
            if i == 0 {
                self.layers[0].backward_sparse(&cache.active, &grad);
            } else {
                let mut input_grad = vec![0.0; self.layers[i].input_dim];
                self.layers[i].backward(&cache.post[i - 1], &grad, &mut input_grad);
                grad = input_grad;
            }
        }
    }

    /// 勾配をゼロにリセット
    pub fn zero_grad(&mut self) {
        for layer in &mut self.layers {
            layer.zero_grad();
        }
    }

    /// パラメータ数
    pub fn param_count(&self) -> usize {
        self.layers.iter().map(TrainableLinear::param_count).sum()
    }

    /// 出力用のテンソル列（`fc{i}.weight`, `fc{i}.bias` の順）
    pub fn to_artifact(&self) -> WeightArtifact {
        let mut artifact = WeightArtifact::default();
        for (i, layer) in self.layers.iter().enumerate() {
            artifact.push(ParameterTensor::matrix(
                format!("fc{i}.weight"),
                layer.output_dim,
                layer.input_dim,
                layer.weights.clone(),
            ));
            artifact.push(ParameterTensor::vector(format!("fc{i}.bias"), layer.biases.clone()));
        }
        artifact
    }
}

/// 順伝播時の中間値キャッシュ
#[derive(Debug, Default)]
pub struct ForwardCache {
    /// 第1層へのアクティブ特徴量
    pub active: Vec<usize>,
    /// 各層の活性化前出力
    pub pre: Vec<Vec<f32>>,
    /// 各層の活性化後出力（最終層は恒等）
    pub post: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR";

    #[test]
    fn test_trainable_linear_forward() {
        let mut layer = TrainableLinear::new(4, 2);
        layer.weights = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        layer.biases = vec![1.0, 2.0];

        let input = [1.0, 2.0, 3.0, 4.0];
        let mut output = [0.0; 2];
        layer.forward(&input, &mut output);

        // 1 + 1 + 4 + 9 + 16 = 31, 2 + 5 + 12 + 21 + 32 = 72
        assert!((output[0] - 31.0).abs() < 1e-5);
        assert!((output[1] - 72.0).abs() < 1e-5);
    }

    #[test]
    fn test_sparse_forward_matches_dense() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut layer = TrainableLinear::new(6, 3);
        layer.init_he(&mut rng);
        layer.biases = vec![0.1, -0.2, 0.3];

        let dense = [0.0, 1.0, 0.0, 0.0, 1.0, 1.0];
        let mut a = [0.0; 3];
        let mut b = [0.0; 3];
        layer.forward(&dense, &mut a);
        layer.forward_sparse(&[1, 4, 5], &mut b);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_dims_and_param_count() {
        let net = TrainableNetwork::new(&[16, 4]);
        assert_eq!(net.dims(), vec![768, 16, 4, 1]);
        assert_eq!(net.hidden(), vec![16, 4]);
        assert_eq!(net.param_count(), 768 * 16 + 16 + 16 * 4 + 4 + 4 + 1);

        let linear = TrainableNetwork::new(&[]);
        assert_eq!(linear.dims(), vec![768, 1]);
        assert!(linear.hidden().is_empty());
    }

    #[test]
    fn test_forward_is_finite() {
        let mut net = TrainableNetwork::new(&[8]);
        net.init_random(&mut ChaCha8Rng::seed_from_u64(1));
        let features = sunset_core::encode(START, false).unwrap();
        let (out, cache) = net.forward(&features);
        assert!(out.is_finite());
        assert_eq!(cache.active.len(), 32);
        assert_eq!(cache.pre.len(), 2);

        // 駒のない盤面ではバイアスだけが効く
        let (out, _) = TrainableNetwork::new(&[8]).forward(&FeatureVector::zeros());
        assert_eq!(out, 0.0);
    }

    /// 解析的な勾配と数値微分を比べる
    #[test]
    fn test_backward_matches_numeric_gradient() {
        let mut net = TrainableNetwork::new(&[5, 3]);
        net.init_random(&mut ChaCha8Rng::seed_from_u64(11));
        for layer in &mut net.layers {
            for b in &mut layer.biases {
                *b = 0.05;
            }
        }
        let features = sunset_core::encode("4k3/8/8/3q4/8/2N5/8/4K2R", false).unwrap();

        let (_, cache) = net.forward(&features);
        net.zero_grad();
        net.backward(&cache, 1.0);

        let eps = 1e-3;
        let checks = [(0usize, 4 * 768 + 1usize), (1, 2), (2, 1)];
        for (layer, idx) in checks {
            let idx = if layer == 0 {
                // アクティブな特徴量に対応する重みを選ぶ
                cache.active[0] + 768 * (idx / 768)
            } else {
                idx
            };
            let analytic = net.layers[layer].weight_grads[idx];
            let mut plus = net.clone();
            plus.layers[layer].weights[idx] += eps;
            let mut minus = net.clone();
            minus.layers[layer].weights[idx] -= eps;
            let numeric = (plus.forward(&features).0 - minus.forward(&features).0) / (2.0 * eps);
            assert!(
                (analytic - numeric).abs() < 1e-2,
                "layer {layer} idx {idx}: analytic {analytic} numeric {numeric}"
            );
        }

        let analytic = net.layers[2].bias_grads[0];
        assert!((analytic - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_artifact_order_and_shapes() {
        let net = TrainableNetwork::new(&[4]);
        let artifact = net.to_artifact();
        let names: Vec<&str> = artifact.tensors().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["fc0.weight", "fc0.bias", "fc1.weight", "fc1.bias"]);
        assert_eq!(artifact.tensors()[0].shape, vec![4, 768]);
        assert_eq!(artifact.tensors()[1].shape, vec![4]);
        assert_eq!(artifact.tensors()[2].shape, vec![1, 4]);

        let blocks = sunset_core::export::parse_plain(&artifact.render_plain().unwrap()).unwrap();
        assert_eq!(blocks[0].layer_size, 4);
        assert_eq!(blocks[0].input_dim(), 768);
        assert_eq!(blocks[1].layer_size, 1);
    }
}
