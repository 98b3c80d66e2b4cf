pub use act_funcs::*;
pub use backprop::*;

pub mod act_funcs;
pub mod backprop;
