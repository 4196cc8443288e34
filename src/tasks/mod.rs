mod recovery;

pub use recovery::RecoveryTask;
