use burn::{
    nn::{
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
        conv::{Conv2d, Conv2dConfig},
    },
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

/// Batch-norm momentum shared by every block in the network.
pub(crate) const BN_MOMENTUM: f64 = 0.01;

/// Convolution (no bias) → batch norm → ReLU.
#[derive(Module, Debug)]
pub struct ConvBnRelu<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    activation: Relu,
}

impl<B: Backend> ConvBnRelu<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);

        self.activation.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct ConvBnReluConfig {
    input_channels: usize,
    channels: usize,
    #[config(default = "1")]
    kernel_size: usize,
    #[config(default = "1")]
    stride: usize,
}

impl ConvBnReluConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBnRelu<B> {
        let padding = self.kernel_size / 2;
        ConvBnRelu {
            conv: Conv2dConfig::new(
                [self.input_channels, self.channels],
                [self.kernel_size, self.kernel_size],
            )
            .with_stride([self.stride, self.stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_bias(false)
            .init(device),
            bn: BatchNormConfig::new(self.channels)
                .with_momentum(BN_MOMENTUM)
                .init(device),
            activation: Relu::new(),
        }
    }
}

/// Convolution (no bias) → batch norm, without the activation. Used right
/// before a residual addition so the ReLU can run after the sum.
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBn<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);

        self.bn.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct ConvBnConfig {
    input_channels: usize,
    channels: usize,
    #[config(default = "3")]
    kernel_size: usize,
    #[config(default = "1")]
    stride: usize,
}

impl ConvBnConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBn<B> {
        let padding = self.kernel_size / 2;
        ConvBn {
            conv: Conv2dConfig::new(
                [self.input_channels, self.channels],
                [self.kernel_size, self.kernel_size],
            )
            .with_stride([self.stride, self.stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_bias(false)
            .init(device),
            bn: BatchNormConfig::new(self.channels)
                .with_momentum(BN_MOMENTUM)
                .init(device),
        }
    }
}

/// Strided residual block dividing the spatial dimensions by `factor`.
///
/// Main path: 1×1 → strided 3×3 → 1×1 conv-bn-relu; shortcut: strided 1×1
/// conv-bn of the original input; output is ReLU of their sum.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    reduce1: ConvBnRelu<B>,
    reduce2: ConvBnRelu<B>,
    reduce3: ConvBnRelu<B>,
    shortcut: ConvBn<B>,
    activation: Relu,
}

impl<B: Backend> Downsample<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = self.shortcut.forward(x.clone());

        let x = self.reduce1.forward(x);
        let x = self.reduce2.forward(x);
        let x = self.reduce3.forward(x);

        self.activation.forward(x + residual)
    }
}

#[derive(Config, Debug)]
pub struct DownsampleConfig {
    input_channels: usize,
    channels: usize,
    factor: usize,
}

impl DownsampleConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Downsample<B> {
        Downsample {
            reduce1: ConvBnReluConfig::new(self.input_channels, self.channels).init(device),
            reduce2: ConvBnReluConfig::new(self.channels, self.channels)
                .with_kernel_size(3)
                .with_stride(self.factor)
                .init(device),
            reduce3: ConvBnReluConfig::new(self.channels, self.channels).init(device),
            shortcut: ConvBnConfig::new(self.input_channels, self.channels)
                .with_kernel_size(1)
                .with_stride(self.factor)
                .init(device),
            activation: Relu::new(),
        }
    }
}

/// Conv block followed by a bilinear resize multiplying the spatial
/// dimensions by `factor`, then batch norm and ReLU.
#[derive(Module, Debug)]
pub struct Upsample<B: Backend> {
    conv1: ConvBnRelu<B>,
    conv2: ConvBnRelu<B>,
    bn: BatchNorm<B, 2>,
    activation: Relu,
    factor: usize,
}

impl<B: Backend> Upsample<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);

        let [_, _, height, width] = x.dims();
        let x = interpolate(
            x,
            [height * self.factor, width * self.factor],
            InterpolateOptions::new(InterpolateMode::Bilinear),
        );

        let x = self.bn.forward(x);
        self.activation.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct UpsampleConfig {
    input_channels: usize,
    channels: usize,
    factor: usize,
}

impl UpsampleConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Upsample<B> {
        Upsample {
            conv1: ConvBnReluConfig::new(self.input_channels, self.channels).init(device),
            conv2: ConvBnReluConfig::new(self.channels, self.channels)
                .with_kernel_size(3)
                .init(device),
            bn: BatchNormConfig::new(self.channels)
                .with_momentum(BN_MOMENTUM)
                .init(device),
            activation: Relu::new(),
            factor: self.factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    #[test]
    fn conv_bn_relu_preserves_spatial_dims_and_sets_channels() {
        let device = Default::default();
        let input =
            Tensor::<TestBackend, 4>::random([2, 8, 16, 24], Distribution::Default, &device);

        for kernel_size in [1, 3, 5] {
            let block = ConvBnReluConfig::new(8, 12)
                .with_kernel_size(kernel_size)
                .init::<TestBackend>(&device);
            assert_eq!(block.forward(input.clone()).dims(), [2, 12, 16, 24]);
        }
    }

    #[test]
    fn conv_bn_preserves_spatial_dims_and_sets_channels() {
        let device = Default::default();
        let input =
            Tensor::<TestBackend, 4>::random([1, 4, 32, 32], Distribution::Default, &device);

        let block = ConvBnConfig::new(4, 7).init::<TestBackend>(&device);
        assert_eq!(block.forward(input).dims(), [1, 7, 32, 32]);
    }

    #[test]
    fn downsample_divides_spatial_dims_by_factor() {
        let device = Default::default();
        let input =
            Tensor::<TestBackend, 4>::random([2, 8, 32, 32], Distribution::Default, &device);

        for factor in [2, 4, 8] {
            let block = DownsampleConfig::new(8, 16, factor).init::<TestBackend>(&device);
            let output = block.forward(input.clone());
            assert_eq!(output.dims(), [2, 16, 32 / factor, 32 / factor]);
        }
    }

    #[test]
    fn upsample_multiplies_spatial_dims_by_factor() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::random([2, 8, 8, 8], Distribution::Default, &device);

        for factor in [2, 4] {
            let block = UpsampleConfig::new(8, 8, factor).init::<TestBackend>(&device);
            let output = block.forward(input.clone());
            assert_eq!(output.dims(), [2, 8, 8 * factor, 8 * factor]);
        }
    }

    #[test]
    fn downsample_then_upsample_restores_spatial_dims() {
        let device = Default::default();
        let input =
            Tensor::<TestBackend, 4>::random([1, 8, 16, 16], Distribution::Default, &device);

        let down = DownsampleConfig::new(8, 16, 4).init::<TestBackend>(&device);
        let up = UpsampleConfig::new(16, 8, 4).init::<TestBackend>(&device);

        let output = up.forward(down.forward(input));
        assert_eq!(output.dims(), [1, 8, 16, 16]);
    }
}
