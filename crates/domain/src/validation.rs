use jobservice_core::{JobError, JobResult};

/// 分区ID、作业ID和标签名不允许包含的字符
pub const RESERVED_CHARACTERS: [char; 10] = ['.', ',', ':', ';', '*', '?', '!', '|', '(', ')'];

pub fn contains_reserved_characters(value: &str) -> bool {
    value.contains(RESERVED_CHARACTERS)
}

pub fn validate_job_id(job_id: &str) -> JobResult<()> {
    if job_id.trim().is_empty() {
        return Err(JobError::bad_request("The job identifier has not been specified."));
    }
    if contains_reserved_characters(job_id) {
        return Err(JobError::bad_request(
            "The job identifier contains one or more invalid characters.",
        ));
    }
    Ok(())
}

pub fn validate_partition_id(partition_id: &str) -> JobResult<()> {
    if partition_id.trim().is_empty() {
        return Err(JobError::bad_request("The partition identifier has not been specified."));
    }
    if contains_reserved_characters(partition_id) {
        return Err(JobError::bad_request(
            "The partition identifier contains one or more invalid characters.",
        ));
    }
    Ok(())
}

pub fn validate_label_name(label: &str) -> JobResult<()> {
    if label.is_empty() || contains_reserved_characters(label) {
        return Err(JobError::bad_request(format!(
            "The label name '{label}' is empty or contains one or more invalid characters."
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_reserved_character_is_rejected() {
        for c in RESERVED_CHARACTERS {
            let id = format!("job{c}1");
            assert!(validate_job_id(&id).is_err(), "character {c}");
            assert!(validate_partition_id(&id).is_err(), "character {c}");
        }
    }

    #[test]
    fn test_valid_and_empty_ids() {
        assert!(validate_job_id("nightly-export_2024").is_ok());
        let err = validate_job_id("  ").unwrap_err();
        assert!(err.to_string().contains("has not been specified"));
        assert!(validate_label_name("owner").is_ok());
        assert!(validate_label_name("team.name").is_err());
    }
}
