pub mod error;

// algorithm module
pub mod algorithm {
    pub mod solver;
    pub mod ordering;
    pub mod chunking;
    pub mod expression;
    pub mod aggregation;
    pub mod threshold;
}

// data module
pub mod data {
    pub mod spot;
    pub mod frame;
    pub mod rect;
    pub mod teaching_point;
    pub mod age_model;
}

// alignment module
pub mod alignment {
    pub mod registry;
    pub mod pairing;
}
