pub mod job_registry;
pub mod reporter;
pub mod upscale_job;
pub mod upscale_service;
