use stacked_errors::{Result, StackableErr};

/// Returns the final resource segment of an ECS ARN.
///
/// Works for the long format (`arn:aws:ecs:us-east-1:012345678901:service/\
/// my-cluster/my-service` -> `my-service`), the pre-2018 short format
/// (`...:service/my-service` -> `my-service`), and passes bare names through
/// unchanged, so it can be applied to values that may be either.
pub fn resource_name(arn: &str) -> &str {
    match arn.rsplit_once('/') {
        Some((_, name)) => name,
        None => arn,
    }
}

/// Splits a task definition ARN or a plain `family:revision` string into the
/// family name and the numeric revision
pub fn family_revision(taskdef: &str) -> Result<(&str, i32)> {
    let (family, revision) = resource_name(taskdef).rsplit_once(':').stack_err_with(|| {
        format!("family_revision(taskdef: {taskdef}) -> no `family:revision` segment")
    })?;
    let revision = revision.parse().stack_err_with(|| {
        format!("family_revision(taskdef: {taskdef}) -> revision \"{revision}\" is not an integer")
    })?;
    Ok((family, revision))
}

/// Returns the first ARN whose resource name equals `name`, which is how a
/// plain `--service` argument is matched against a cluster's service ARNs
pub fn match_service_arn<'a>(service_arns: &'a [String], name: &str) -> Option<&'a str> {
    service_arns
        .iter()
        .map(|arn| arn.as_str())
        .find(|arn| resource_name(arn) == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG: &str = "arn:aws:ecs:us-east-1:012345678901:service/prod/billing-api";
    const SHORT: &str = "arn:aws:ecs:us-east-1:012345678901:service/billing-api";

    #[test]
    fn resource_names() {
        assert_eq!(resource_name(LONG), "billing-api");
        assert_eq!(resource_name(SHORT), "billing-api");
        assert_eq!(resource_name("billing-api"), "billing-api");
        assert_eq!(
            resource_name("arn:aws:ecs:us-east-1:012345678901:cluster/prod"),
            "prod"
        );
        assert_eq!(
            resource_name(
                "arn:aws:ecs:us-east-1:012345678901:task/prod/8f03e41fe56d4f0db85a5e3fc3e28a3d"
            ),
            "8f03e41fe56d4f0db85a5e3fc3e28a3d"
        );
    }

    #[test]
    fn family_revisions() {
        assert_eq!(
            family_revision("arn:aws:ecs:us-east-1:012345678901:task-definition/billing:42")
                .unwrap(),
            ("billing", 42)
        );
        assert_eq!(family_revision("billing:7").unwrap(), ("billing", 7));
        assert!(family_revision("billing").is_err());
        assert!(family_revision("billing:seven").is_err());
    }

    #[test]
    fn service_arn_matching() {
        let arns = vec![
            "arn:aws:ecs:us-east-1:012345678901:service/prod/billing-api".to_owned(),
            "arn:aws:ecs:us-east-1:012345678901:service/prod/billing".to_owned(),
            "arn:aws:ecs:us-east-1:012345678901:service/billing-worker".to_owned(),
        ];
        // exact resource name only, never a prefix match
        assert_eq!(match_service_arn(&arns, "billing"), Some(arns[1].as_str()));
        assert_eq!(
            match_service_arn(&arns, "billing-worker"),
            Some(arns[2].as_str())
        );
        assert_eq!(match_service_arn(&arns, "frontend"), None);
        assert_eq!(match_service_arn(&[], "billing"), None);
    }
}
