//! Dual-head network: one image in, class logits and nutrition values out.
//!
//! A convolutional backbone shared by two dense heads:
//! - classification: `u -> u/2 -> K`, softmax at inference
//! - nutrition: `u -> u/2 -> u/4 -> 7`, linear output
//!
//! Nutrition outputs are unbounded; nothing in training constrains their
//! sign, so predictions can be negative.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};
use nutrition_core::{ModelConfig, NUTRITION_DIMS};

/// Name of the classification output in artifacts.
pub const CLASSIFICATION_OUTPUT: &str = "food_classification";
/// Name of the regression output in artifacts.
pub const NUTRITION_OUTPUT: &str = "nutrition_values";

#[derive(Config, Debug)]
pub struct NutritionNetConfig {
    /// Number of food classes (K)
    pub num_classes: usize,

    /// Square input resolution
    #[config(default = "224")]
    pub input_size: usize,

    #[config(default = "3")]
    pub in_channels: usize,

    /// Filters of the first block, doubled per block
    #[config(default = "32")]
    pub base_filters: usize,

    /// Width of the first dense layer of each head
    #[config(default = "512")]
    pub head_units: usize,

    #[config(default = "0.3")]
    pub dropout: f64,

    #[config(default = "0.2")]
    pub late_dropout: f64,

    #[config(default = "7")]
    pub nutrition_dims: usize,
}

impl NutritionNetConfig {
    /// Network settings from a training configuration.
    pub fn from_model_config(num_classes: usize, input_size: usize, config: &ModelConfig) -> Self {
        Self::new(num_classes)
            .with_input_size(input_size)
            .with_base_filters(config.base_filters)
            .with_head_units(config.head_units)
            .with_dropout(config.dropout)
            .with_late_dropout(config.late_dropout)
            .with_nutrition_dims(NUTRITION_DIMS)
    }

    /// Expected input as `[height, width, channels]`
    pub fn input_shape(&self) -> [usize; 3] {
        [self.input_size, self.input_size, self.in_channels]
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> NutritionNet<B> {
        NutritionNet::new(self, device)
    }
}

/// Conv2d, BatchNorm, ReLU and a 2x2 max-pool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
    relu: Relu,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct ClassificationHead<B: Backend> {
    fc1: Linear<B>,
    dropout1: Dropout,
    fc2: Linear<B>,
    dropout2: Dropout,
    out: Linear<B>,
}

impl<B: Backend> ClassificationHead<B> {
    fn new(config: &NutritionNetConfig, features: usize, device: &B::Device) -> Self {
        let units = config.head_units;
        Self {
            fc1: LinearConfig::new(features, units).init(device),
            dropout1: DropoutConfig::new(config.dropout).init(),
            fc2: LinearConfig::new(units, units / 2).init(device),
            dropout2: DropoutConfig::new(config.late_dropout).init(),
            out: LinearConfig::new(units / 2, config.num_classes).init(device),
        }
    }

    /// Logits `[batch, K]`
    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let relu = Relu::new();
        let x = self.dropout1.forward(relu.forward(self.fc1.forward(x)));
        let x = self.dropout2.forward(relu.forward(self.fc2.forward(x)));
        self.out.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct NutritionHead<B: Backend> {
    fc1: Linear<B>,
    dropout1: Dropout,
    fc2: Linear<B>,
    dropout2: Dropout,
    fc3: Linear<B>,
    out: Linear<B>,
}

impl<B: Backend> NutritionHead<B> {
    fn new(config: &NutritionNetConfig, features: usize, device: &B::Device) -> Self {
        let units = config.head_units;
        Self {
            fc1: LinearConfig::new(features, units).init(device),
            dropout1: DropoutConfig::new(config.dropout).init(),
            fc2: LinearConfig::new(units, units / 2).init(device),
            dropout2: DropoutConfig::new(config.late_dropout).init(),
            fc3: LinearConfig::new(units / 2, units / 4).init(device),
            out: LinearConfig::new(units / 4, config.nutrition_dims).init(device),
        }
    }

    /// Raw nutrition values `[batch, 7]`
    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let relu = Relu::new();
        let x = self.dropout1.forward(relu.forward(self.fc1.forward(x)));
        let x = self.dropout2.forward(relu.forward(self.fc2.forward(x)));
        let x = relu.forward(self.fc3.forward(x));
        self.out.forward(x)
    }
}

/// Both outputs of one forward pass
#[derive(Debug, Clone)]
pub struct DualOutput<B: Backend> {
    /// `[batch, K]`; logits from `forward`, probabilities from `infer`
    pub classification: Tensor<B, 2>,
    /// `[batch, 7]`
    pub nutrition: Tensor<B, 2>,
}

#[derive(Module, Debug)]
pub struct NutritionNet<B: Backend> {
    conv1: ConvBlock<B>,
    conv2: ConvBlock<B>,
    conv3: ConvBlock<B>,
    conv4: ConvBlock<B>,
    global_pool: AdaptiveAvgPool2d,
    classifier: ClassificationHead<B>,
    regressor: NutritionHead<B>,
    num_classes: usize,
    input_size: usize,
    in_channels: usize,
}

impl<B: Backend> NutritionNet<B> {
    pub fn new(config: &NutritionNetConfig, device: &B::Device) -> Self {
        let base = config.base_filters;

        // 224 -> 112 -> 56 -> 28 -> 14
        let conv1 = ConvBlock::new(config.in_channels, base, device);
        let conv2 = ConvBlock::new(base, base * 2, device);
        let conv3 = ConvBlock::new(base * 2, base * 4, device);
        let conv4 = ConvBlock::new(base * 4, base * 8, device);

        Self {
            conv1,
            conv2,
            conv3,
            conv4,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            classifier: ClassificationHead::new(config, base * 8, device),
            regressor: NutritionHead::new(config, base * 8, device),
            num_classes: config.num_classes,
            input_size: config.input_size,
            in_channels: config.in_channels,
        }
    }

    /// Shared features `[batch, channels]`
    fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(images);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);
        let x = self.conv4.forward(x);

        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }

    /// Training forward pass: class logits and raw nutrition values.
    pub fn forward(&self, images: Tensor<B, 4>) -> DualOutput<B> {
        let features = self.features(images);
        DualOutput {
            classification: self.classifier.forward(features.clone()),
            nutrition: self.regressor.forward(features),
        }
    }

    /// Class probabilities (softmax) and raw nutrition values.
    pub fn infer(&self, images: Tensor<B, 4>) -> DualOutput<B> {
        let output = self.forward(images);
        DualOutput {
            classification: softmax(output.classification, 1),
            nutrition: output.nutrition,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn input_shape(&self) -> [usize; 3] {
        [self.input_size, self.input_size, self.in_channels]
    }
}
