pub(crate) mod commit;
pub(crate) mod export;
pub(crate) mod meta;
pub(crate) mod migrate;
pub(crate) mod reconcile;
pub(crate) mod shared;
