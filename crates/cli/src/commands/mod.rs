pub(crate) mod batch;
pub(crate) mod digest;
pub(crate) mod product;
pub(crate) mod smoke;
pub(crate) mod verify;
