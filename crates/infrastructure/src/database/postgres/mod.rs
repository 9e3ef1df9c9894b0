pub mod postgres_job_definition_repository;
pub mod postgres_job_info_repository;

pub use postgres_job_definition_repository::PostgresJobDefinitionRepository;
pub use postgres_job_info_repository::PostgresJobInfoRepository;
