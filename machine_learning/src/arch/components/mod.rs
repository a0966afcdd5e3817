mod affine;
mod dropout;
mod log_softmax;
mod natural_gradient;
mod sigmoid;

pub use affine::Affine;
pub use dropout::Dropout;
pub use log_softmax::LogSoftmax;
pub use natural_gradient::Preconditioner;
pub use sigmoid::Sigmoid;
