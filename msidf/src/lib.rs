// src/lib.rs
pub mod error;
pub mod config;

pub mod data {
    pub mod handle;
    pub mod meta;
    pub mod utility;
}

pub mod transform {
    pub mod spots;
    pub mod align;
    pub mod xrf;
}

pub mod profile {
    pub mod resolver;
    pub mod source;
    pub mod output;
    pub mod xrf;
    pub mod pipeline;
}
