// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Builtin object types, in sync order.

use super::TypeDescriptor;
use crate::error::SyncError;
use crate::row::command::{Checkcommand, CheckcommandEnvvar, CHECKCOMMAND_COLUMNS, CHECKCOMMAND_ENVVAR_COLUMNS};
use crate::row::customvar::{
    CheckcommandCustomvar, Customvar, HostCustomvar, ServiceCustomvar, CHECKCOMMAND_CUSTOMVAR_COLUMNS,
    CUSTOMVAR_COLUMNS, HOST_CUSTOMVAR_COLUMNS, SERVICE_CUSTOMVAR_COLUMNS,
};
use crate::row::endpoint::{Endpoint, Zone, ENDPOINT_COLUMNS, ZONE_COLUMNS};
use crate::row::group::{
    Group, HostgroupMember, ServicegroupMember, GROUP_COLUMNS, HOSTGROUP_MEMBER_COLUMNS, SERVICEGROUP_MEMBER_COLUMNS,
};
use crate::row::host::{Host, HOST_COLUMNS};
use crate::row::service::{Service, SERVICE_COLUMNS};
use crate::row::timeperiod::{Timeperiod, TimeperiodRanges, TIMEPERIOD_COLUMNS, TIMEPERIOD_RANGE_COLUMNS};
use crate::row::value::{ActionUrl, IconImage, NotesUrl, ACTION_URL_COLUMNS, ICON_IMAGE_COLUMNS, NOTES_URL_COLUMNS};

/// Every builtin descriptor; dependencies always precede their dependents.
pub fn descriptors() -> Result<Vec<TypeDescriptor>, SyncError> {
    Ok(vec![
        TypeDescriptor::builder("zone", ZONE_COLUMNS, Zone::factory)
            .checksum()
            .build()?,
        TypeDescriptor::builder("endpoint", ENDPOINT_COLUMNS, Endpoint::factory)
            .checksum()
            .depends_on(&["zone"])
            .build()?,
        TypeDescriptor::builder("customvar", CUSTOMVAR_COLUMNS, Customvar::factory).build()?,
        TypeDescriptor::builder("action_url", ACTION_URL_COLUMNS, ActionUrl::factory).build()?,
        TypeDescriptor::builder("notes_url", NOTES_URL_COLUMNS, NotesUrl::factory).build()?,
        TypeDescriptor::builder("icon_image", ICON_IMAGE_COLUMNS, IconImage::factory).build()?,
        TypeDescriptor::builder("checkcommand", CHECKCOMMAND_COLUMNS, Checkcommand::factory)
            .checksum()
            .depends_on(&["zone"])
            .build()?,
        TypeDescriptor::builder("checkcommand_envvar", CHECKCOMMAND_ENVVAR_COLUMNS, CheckcommandEnvvar::factory)
            .cache_key("checkcommand:envvar")
            .checksum()
            .depends_on(&["checkcommand"])
            .build()?,
        TypeDescriptor::builder("checkcommand_customvar", CHECKCOMMAND_CUSTOMVAR_COLUMNS, CheckcommandCustomvar::factory)
            .cache_key("checkcommand:customvar")
            .depends_on(&["checkcommand", "customvar"])
            .build()?,
        TypeDescriptor::builder("timeperiod", TIMEPERIOD_COLUMNS, Timeperiod::factory)
            .checksum()
            .depends_on(&["zone"])
            .build()?,
        TypeDescriptor::builder("timeperiod_range", TIMEPERIOD_RANGE_COLUMNS, TimeperiodRanges::factory)
            .cache_key("timeperiod:range")
            .checksum()
            .delta_column("timeperiod_id")
            .depends_on(&["timeperiod"])
            .build()?,
        TypeDescriptor::builder("host", HOST_COLUMNS, Host::factory)
            .checksum()
            .notify("host")
            .depends_on(&[
                "zone",
                "endpoint",
                "checkcommand",
                "timeperiod",
                "action_url",
                "notes_url",
                "icon_image",
            ])
            .build()?,
        TypeDescriptor::builder("host_customvar", HOST_CUSTOMVAR_COLUMNS, HostCustomvar::factory)
            .cache_key("host:customvar")
            .depends_on(&["host", "customvar"])
            .build()?,
        TypeDescriptor::builder("hostgroup", GROUP_COLUMNS, Group::factory)
            .checksum()
            .depends_on(&["zone"])
            .build()?,
        TypeDescriptor::builder("hostgroup_member", HOSTGROUP_MEMBER_COLUMNS, HostgroupMember::factory)
            .cache_key("hostgroup:member")
            .depends_on(&["host", "hostgroup"])
            .build()?,
        TypeDescriptor::builder("service", SERVICE_COLUMNS, Service::factory)
            .checksum()
            .notify("service")
            .depends_on(&["host", "checkcommand", "timeperiod"])
            .build()?,
        TypeDescriptor::builder("service_customvar", SERVICE_CUSTOMVAR_COLUMNS, ServiceCustomvar::factory)
            .cache_key("service:customvar")
            .depends_on(&["service", "customvar"])
            .build()?,
        TypeDescriptor::builder("servicegroup", GROUP_COLUMNS, Group::factory)
            .checksum()
            .depends_on(&["zone"])
            .build()?,
        TypeDescriptor::builder("servicegroup_member", SERVICEGROUP_MEMBER_COLUMNS, ServicegroupMember::factory)
            .cache_key("servicegroup:member")
            .depends_on(&["service", "servicegroup"])
            .build()?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_order() {
        let names: Vec<&str> = descriptors().unwrap().iter().map(|d| d.object_type).collect();
        assert_eq!(names.len(), 19);
        assert_eq!(names.first(), Some(&"zone"));
        assert_eq!(names.last(), Some(&"servicegroup_member"));
    }

    #[test]
    fn test_checksum_flags() {
        let checksummed: Vec<&str> = descriptors()
            .unwrap()
            .iter()
            .filter(|d| d.has_checksum)
            .map(|d| d.object_type)
            .collect();
        assert_eq!(
            checksummed,
            vec![
                "zone",
                "endpoint",
                "checkcommand",
                "checkcommand_envvar",
                "timeperiod",
                "timeperiod_range",
                "host",
                "hostgroup",
                "service",
                "servicegroup",
            ]
        );
    }

    #[test]
    fn test_notification_tags() {
        for d in descriptors().unwrap() {
            match d.object_type {
                "host" | "service" => assert_eq!(d.notification_tag, Some(d.object_type)),
                _ => assert!(d.notification_tag.is_none()),
            }
        }
    }
}
