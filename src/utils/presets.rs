//! Built-in plant presets.

use crate::engine::plant::{PlantMode, PlantParameters};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preset {
    pub id: &'static str,
    pub name: &'static str,
    pub plant: PlantParameters,
}

pub const PRESETS: [Preset; 3] = [
    Preset {
        id: "horno-lento",
        name: "Horno lento",
        plant: PlantParameters {
            k: 0.015,
            tau: 180.0,
            dead_time: 5.0,
            t_amb: 25.0,
            mode: PlantMode::Heating,
        },
    },
    Preset {
        id: "horno-medio",
        name: "Horno medio",
        plant: PlantParameters {
            k: 0.03,
            tau: 90.0,
            dead_time: 3.0,
            t_amb: 25.0,
            mode: PlantMode::Heating,
        },
    },
    Preset {
        id: "chiller-compacto",
        name: "Chiller compacto",
        plant: PlantParameters {
            k: 0.04,
            tau: 60.0,
            dead_time: 2.0,
            t_amb: 25.0,
            mode: PlantMode::Cooling,
        },
    },
];

pub fn find(id: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.id == id)
}
