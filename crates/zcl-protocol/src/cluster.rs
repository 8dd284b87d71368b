//! ZCL cluster, profile and device identifiers

/// Common ZCL cluster IDs
pub mod id {
    // General Clusters
    pub const BASIC: u16 = 0x0000;
    pub const POWER_CONFIG: u16 = 0x0001;
    pub const IDENTIFY: u16 = 0x0003;
    pub const GROUPS: u16 = 0x0004;
    pub const SCENES: u16 = 0x0005;
    pub const ON_OFF: u16 = 0x0006;
    pub const ON_OFF_SWITCH_CONFIG: u16 = 0x0007;
    pub const LEVEL_CONTROL: u16 = 0x0008;

    // Lighting Clusters
    pub const COLOR_CONTROL: u16 = 0x0300;

    // Measurement Clusters
    pub const ILLUMINANCE_MEASUREMENT: u16 = 0x0400;
    pub const ILLUMINANCE_LEVEL_SENSING: u16 = 0x0401;
    pub const OCCUPANCY_SENSING: u16 = 0x0406;

    // Commissioning (ZLL utility / touchlink endpoint side)
    pub const COMMISSIONING: u16 = 0x1000;

    // Green Power proxy
    pub const GREEN_POWER: u16 = 0x0021;
}

/// Basic cluster attributes
pub mod basic_attr {
    pub const ZCL_VERSION: u16 = 0x0000;
    pub const MANUFACTURER_NAME: u16 = 0x0004;
    pub const MODEL_IDENTIFIER: u16 = 0x0005;
    pub const POWER_SOURCE: u16 = 0x0007;
    pub const SW_BUILD_ID: u16 = 0x4000;
}

/// On/Off cluster attributes
pub mod onoff_attr {
    pub const ON_OFF: u16 = 0x0000;
}

/// Level cluster attributes
pub mod level_attr {
    pub const CURRENT_LEVEL: u16 = 0x0000;
}

/// Color control cluster attributes
pub mod color_attr {
    pub const CURRENT_HUE: u16 = 0x0000;
    pub const CURRENT_SATURATION: u16 = 0x0001;
    pub const CURRENT_X: u16 = 0x0003;
    pub const CURRENT_Y: u16 = 0x0004;
    pub const COLOR_TEMPERATURE: u16 = 0x0007;
    pub const COLOR_MODE: u16 = 0x0008;
    pub const ENHANCED_CURRENT_HUE: u16 = 0x4000;
    pub const COLOR_LOOP_ACTIVE: u16 = 0x4002;
}

/// Illuminance measurement cluster attributes
pub mod illuminance_attr {
    pub const MEASURED_VALUE: u16 = 0x0000;
}

/// Occupancy sensing cluster attributes
pub mod occupancy_attr {
    pub const OCCUPANCY: u16 = 0x0000;
    pub const OCCUPIED_TO_UNOCCUPIED_DELAY: u16 = 0x0010;
}

/// Commissioning cluster command IDs (group identifier queries)
pub mod commissioning_cmd {
    pub const GET_GROUP_IDENTIFIERS: u8 = 0x41;
    pub const GET_GROUP_IDENTIFIERS_RESPONSE: u8 = 0x41;
}

/// ZCL profile IDs
pub mod profile {
    pub const ZDP: u16 = 0x0000;
    pub const HOME_AUTOMATION: u16 = 0x0104;
    pub const ZLL: u16 = 0xC05E;
    pub const GREEN_POWER: u16 = 0xA1E0;
}

/// Device IDs admitted as lights (HA and ZLL profiles)
pub mod device {
    pub const MAINS_POWER_OUTLET: u16 = 0x0009;
    pub const HA_ONOFF_LIGHT: u16 = 0x0100;
    pub const ONOFF_OUTPUT: u16 = 0x0002;
    pub const HA_DIMMABLE_LIGHT: u16 = 0x0101;
    pub const HA_COLOR_DIMMABLE_LIGHT: u16 = 0x0102;

    pub const ZLL_ONOFF_LIGHT: u16 = 0x0000;
    pub const ZLL_ONOFF_PLUGIN_UNIT: u16 = 0x0010;
    pub const ZLL_DIMMABLE_LIGHT: u16 = 0x0100;
    pub const ZLL_DIMMABLE_PLUGIN_UNIT: u16 = 0x0110;
    pub const ZLL_COLOR_LIGHT: u16 = 0x0200;
    pub const ZLL_EXTENDED_COLOR_LIGHT: u16 = 0x0210;
    pub const ZLL_COLOR_TEMPERATURE_LIGHT: u16 = 0x0220;
    pub const ZLL_COLOR_CONTROLLER: u16 = 0x0800;
    pub const ZLL_ONOFF_SENSOR: u16 = 0x0850;

    /// Green power on/off switch (the only GPD admitted today)
    pub const GP_ONOFF_SWITCH: u8 = 0x02;
}

/// On/Off cluster command IDs
pub mod onoff_cmd {
    pub const OFF: u8 = 0x00;
    pub const ON: u8 = 0x01;
    pub const TOGGLE: u8 = 0x02;
    pub const ON_WITH_TIMED_OFF: u8 = 0x42;
}

/// Groups cluster command IDs
pub mod groups_cmd {
    pub const ADD_GROUP: u8 = 0x00;
    pub const VIEW_GROUP: u8 = 0x01;
    pub const GET_GROUP_MEMBERSHIP: u8 = 0x02;
    pub const REMOVE_GROUP: u8 = 0x03;
}

/// Scenes cluster command IDs
pub mod scenes_cmd {
    pub const ADD_SCENE: u8 = 0x00;
    pub const VIEW_SCENE: u8 = 0x01;
    pub const REMOVE_SCENE: u8 = 0x02;
    pub const STORE_SCENE: u8 = 0x04;
    pub const RECALL_SCENE: u8 = 0x05;
    pub const GET_SCENE_MEMBERSHIP: u8 = 0x06;
}

/// ZCL global (profile-wide) command IDs
pub mod global_cmd {
    pub const READ_ATTRIBUTES: u8 = 0x00;
    pub const READ_ATTRIBUTES_RESPONSE: u8 = 0x01;
    pub const WRITE_ATTRIBUTES: u8 = 0x02;
    pub const WRITE_ATTRIBUTES_RESPONSE: u8 = 0x04;
    pub const CONFIGURE_REPORTING: u8 = 0x06;
    pub const REPORT_ATTRIBUTES: u8 = 0x0A;
    pub const DEFAULT_RESPONSE: u8 = 0x0B;
}

/// ZCL data type codes used by the synchronizer
pub mod data_type {
    pub const BOOLEAN: u8 = 0x10;
    pub const BITMAP8: u8 = 0x18;
    pub const UINT8: u8 = 0x20;
    pub const UINT16: u8 = 0x21;
    pub const UINT32: u8 = 0x23;
    pub const INT16: u8 = 0x29;
    pub const ENUM8: u8 = 0x30;
    pub const STRING: u8 = 0x42;
}
