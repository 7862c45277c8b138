//! Contract of the remote management API consumed by the engine.
//!
//! All methods are blocking and may wait on network I/O; the engine only ever
//! calls them from the background pool. History queries return `Ok(None)` when
//! the requested snapshot is no longer retained.

use crate::error::ApiError;
use fabric_monitor_types::{
    FocusPorts, FocusSelector, GroupInfo, ImageId, ImageInfo, PmConfig, PortCounters,
    StateSummary, VfInfo, VfPortCounters,
};

pub type ApiResult<T> = Result<T, ApiError>;

pub trait ManagementApi: Send + Sync {
    /// Performance manager configuration, including the sweep interval
    fn get_config(&self) -> ApiResult<PmConfig>;

    fn get_group_info(&self, group: &str) -> ApiResult<GroupInfo>;

    fn get_group_info_history(
        &self,
        group: &str,
        image_id: ImageId,
        offset: i32,
    ) -> ApiResult<Option<GroupInfo>>;

    fn get_vf_info(&self, vf: &str) -> ApiResult<VfInfo>;

    fn get_vf_info_history(
        &self,
        vf: &str,
        image_id: ImageId,
        offset: i32,
    ) -> ApiResult<Option<VfInfo>>;

    fn get_port_counters(&self, lid: u32, port: u8) -> ApiResult<PortCounters>;

    fn get_port_counters_history(
        &self,
        lid: u32,
        port: u8,
        image_id: ImageId,
        offset: i32,
    ) -> ApiResult<Option<PortCounters>>;

    fn get_vf_port_counters(&self, vf: &str, lid: u32, port: u8) -> ApiResult<VfPortCounters>;

    fn get_vf_port_counters_history(
        &self,
        vf: &str,
        lid: u32,
        port: u8,
        image_id: ImageId,
        offset: i32,
    ) -> ApiResult<Option<VfPortCounters>>;

    fn get_focus_ports(
        &self,
        group: &str,
        selector: FocusSelector,
        range: u32,
    ) -> ApiResult<FocusPorts>;

    /// Image info relative to the newest snapshot; `None` past retention
    fn get_image_info(&self, offset: i32) -> ApiResult<Option<ImageInfo>>;

    fn get_state_summary(&self) -> ApiResult<StateSummary>;
}
