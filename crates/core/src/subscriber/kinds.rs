//! Telemetry kinds served by the management API

use super::{Subscriber, Subscribers, TelemetryKind};
use crate::api::ManagementApi;
use crate::error::ApiError;
use fabric_monitor_types::{
    AttributeKind, FabricSource, FocusPorts, FocusSource, GroupInfo, GroupSource, ImageId,
    ImageInfo, ImageSource, PortCounters, PortSource, StateSummary, VfInfo, VfPortCounters,
    VfPortSource, VfSource,
};

pub struct GroupInfoKind;

impl TelemetryKind for GroupInfoKind {
    type Source = GroupSource;
    type Value = GroupInfo;
    const ATTRIBUTE: AttributeKind = AttributeKind::GroupInfo;
    const HAS_HISTORY: bool = true;

    fn fetch(api: &dyn ManagementApi, source: &GroupSource) -> Result<GroupInfo, ApiError> {
        api.get_group_info(&source.group)
    }

    fn image_id(value: &GroupInfo) -> ImageId {
        value.image_id
    }

    fn fetch_history(
        api: &dyn ManagementApi,
        source: &GroupSource,
        image_id: ImageId,
        offset: i32,
    ) -> Result<Option<GroupInfo>, ApiError> {
        api.get_group_info_history(&source.group, image_id, offset)
    }

    fn describe(source: &GroupSource) -> String {
        format!("group info of {}", source.group)
    }

    fn select(subscribers: &Subscribers) -> &Subscriber<Self> {
        &subscribers.group_info
    }
}

pub struct VfInfoKind;

impl TelemetryKind for VfInfoKind {
    type Source = VfSource;
    type Value = VfInfo;
    const ATTRIBUTE: AttributeKind = AttributeKind::VfInfo;
    const HAS_HISTORY: bool = true;

    fn fetch(api: &dyn ManagementApi, source: &VfSource) -> Result<VfInfo, ApiError> {
        api.get_vf_info(&source.vf)
    }

    fn image_id(value: &VfInfo) -> ImageId {
        value.image_id
    }

    fn fetch_history(
        api: &dyn ManagementApi,
        source: &VfSource,
        image_id: ImageId,
        offset: i32,
    ) -> Result<Option<VfInfo>, ApiError> {
        api.get_vf_info_history(&source.vf, image_id, offset)
    }

    fn describe(source: &VfSource) -> String {
        format!("VF info of {}", source.vf)
    }

    fn select(subscribers: &Subscribers) -> &Subscriber<Self> {
        &subscribers.vf_info
    }
}

pub struct PortCountersKind;

impl TelemetryKind for PortCountersKind {
    type Source = PortSource;
    type Value = PortCounters;
    const ATTRIBUTE: AttributeKind = AttributeKind::PortCounters;
    const HAS_HISTORY: bool = true;

    fn fetch(api: &dyn ManagementApi, source: &PortSource) -> Result<PortCounters, ApiError> {
        api.get_port_counters(source.lid, source.port)
    }

    fn image_id(value: &PortCounters) -> ImageId {
        value.image_id
    }

    fn fetch_history(
        api: &dyn ManagementApi,
        source: &PortSource,
        image_id: ImageId,
        offset: i32,
    ) -> Result<Option<PortCounters>, ApiError> {
        api.get_port_counters_history(source.lid, source.port, image_id, offset)
    }

    fn describe(source: &PortSource) -> String {
        format!("counters of port {}:{}", source.lid, source.port)
    }

    fn select(subscribers: &Subscribers) -> &Subscriber<Self> {
        &subscribers.port_counters
    }
}

pub struct VfPortCountersKind;

impl TelemetryKind for VfPortCountersKind {
    type Source = VfPortSource;
    type Value = VfPortCounters;
    const ATTRIBUTE: AttributeKind = AttributeKind::VfPortCounters;
    const HAS_HISTORY: bool = true;

    fn fetch(api: &dyn ManagementApi, source: &VfPortSource) -> Result<VfPortCounters, ApiError> {
        api.get_vf_port_counters(&source.vf, source.lid, source.port)
    }

    fn image_id(value: &VfPortCounters) -> ImageId {
        value.image_id
    }

    fn fetch_history(
        api: &dyn ManagementApi,
        source: &VfPortSource,
        image_id: ImageId,
        offset: i32,
    ) -> Result<Option<VfPortCounters>, ApiError> {
        api.get_vf_port_counters_history(&source.vf, source.lid, source.port, image_id, offset)
    }

    fn describe(source: &VfPortSource) -> String {
        format!(
            "counters of port {}:{} in VF {}",
            source.lid, source.port, source.vf
        )
    }

    fn select(subscribers: &Subscribers) -> &Subscriber<Self> {
        &subscribers.vf_port_counters
    }
}

pub struct FocusPortsKind;

impl TelemetryKind for FocusPortsKind {
    type Source = FocusSource;
    type Value = FocusPorts;
    const ATTRIBUTE: AttributeKind = AttributeKind::FocusPorts;

    fn fetch(api: &dyn ManagementApi, source: &FocusSource) -> Result<FocusPorts, ApiError> {
        api.get_focus_ports(&source.group, source.selector, source.range)
    }

    fn image_id(value: &FocusPorts) -> ImageId {
        value.image_id
    }

    fn select(subscribers: &Subscribers) -> &Subscriber<Self> {
        &subscribers.focus_ports
    }
}

pub struct ImageInfoKind;

impl TelemetryKind for ImageInfoKind {
    type Source = ImageSource;
    type Value = ImageInfo;
    const ATTRIBUTE: AttributeKind = AttributeKind::ImageInfo;
    const HAS_HISTORY: bool = true;

    fn fetch(api: &dyn ManagementApi, source: &ImageSource) -> Result<ImageInfo, ApiError> {
        api.get_image_info(source.offset)?
            .ok_or_else(|| ApiError::NotFound(format!("image at offset {}", source.offset)))
    }

    fn image_id(value: &ImageInfo) -> ImageId {
        value.image_id
    }

    /// Image info is addressed by offset alone; the anchor id is not needed
    fn fetch_history(
        api: &dyn ManagementApi,
        source: &ImageSource,
        _image_id: ImageId,
        offset: i32,
    ) -> Result<Option<ImageInfo>, ApiError> {
        api.get_image_info(source.offset.saturating_add(offset))
    }

    fn select(subscribers: &Subscribers) -> &Subscriber<Self> {
        &subscribers.image_info
    }
}

pub struct StateSummaryKind;

impl TelemetryKind for StateSummaryKind {
    type Source = FabricSource;
    type Value = StateSummary;
    const ATTRIBUTE: AttributeKind = AttributeKind::StateSummary;

    fn fetch(api: &dyn ManagementApi, _source: &FabricSource) -> Result<StateSummary, ApiError> {
        api.get_state_summary()
    }

    fn image_id(value: &StateSummary) -> ImageId {
        value.image_id
    }

    fn describe(_source: &FabricSource) -> String {
        "fabric state summary".to_string()
    }

    fn select(subscribers: &Subscribers) -> &Subscriber<Self> {
        &subscribers.state_summary
    }
}
