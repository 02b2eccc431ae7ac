mod execution_repo;

pub use execution_repo::ExecutionRepo;
