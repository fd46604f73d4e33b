pub mod annotation;
pub mod gatk;
pub mod picard;
pub mod platypus;
