pub mod bond;
pub mod irr;
