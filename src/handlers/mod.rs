pub mod commands;
pub mod fastq;
pub mod prompt;
