pub mod scan;
pub mod sites;
