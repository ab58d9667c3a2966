#![allow(dead_code)]

use bugsum_core::db::rollup::rollup_batch;
use bugsum_core::db::store::UpsertPolicy;
use bugsum_core::model::{BugTaskFlat, BugTaskImportance, BugTaskStatus, LocationKey, Target, TargetColumns};
use bugsum_core::{SummaryMaintainer, SummaryObserver, TaskChange};
use rusqlite::Connection;

pub fn product_task(bugtask: i64, bug: i64, product: i64) -> BugTaskFlat {
    BugTaskFlat {
        bugtask,
        bug,
        duplicate_of: None,
        target: TargetColumns {
            product: Some(product),
            ..TargetColumns::default()
        },
        status: BugTaskStatus::New,
        importance: BugTaskImportance::Undecided,
        milestone: None,
        assignee: None,
        latest_patch_uploaded: None,
        access_policies: None,
        access_grants: None,
        tags: Vec::new(),
    }
}

pub fn package_task(bugtask: i64, bug: i64, distroseries: i64, package: i64) -> BugTaskFlat {
    BugTaskFlat {
        target: TargetColumns {
            distroseries: Some(distroseries),
            sourcepackagename: Some(package),
            ..TargetColumns::default()
        },
        ..product_task(bugtask, bug, 0)
    }
}

pub fn product_key(product: i64, tag: Option<&str>) -> LocationKey {
    LocationKey {
        target: Target::Product {
            product,
            ociproject: None,
        },
        viewed_by: None,
        access_policy: None,
        tag: tag.map(str::to_owned),
        status: BugTaskStatus::New,
        milestone: None,
        importance: BugTaskImportance::Undecided,
        has_patch: false,
    }
}

/// Apply task changes the way the domain write path does: one transaction.
pub fn mutate(conn: &mut Connection, changes: &[TaskChange]) {
    let tx = conn.transaction().unwrap();
    SummaryMaintainer::new().on_task_changes(&tx, changes).unwrap();
    tx.commit().unwrap();
}

pub fn rollup_all(conn: &mut Connection) -> bugsum_core::RollupReport {
    rollup_batch(conn, None, &UpsertPolicy::default()).unwrap()
}
