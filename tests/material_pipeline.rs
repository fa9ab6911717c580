//! Material pipeline scenario tests
//!
//! Exercises world generation, the buffer layout contract, GPU culling,
//! dynamic-surface rewrites, portal expansion, and texture residency.
//! GPU-dependent tests acquire a device through `init_gpu` and skip when
//! no adapter is available.

use std::sync::Arc;

use anyhow::Result;
use glam::Vec3;

use basalt::gpu::buffer_layouts::{calculations, IndirectCommand};
use basalt::material::{DEPTH_PACK, OPAQUE_PACK};
use basalt::shader::{
    state_bits, ColorGen, Shader, ShaderSort, ShaderStage, StageFamily, WaveFunc, Waveform,
};
use basalt::{
    BoundingSphere, DrawSurface, Frustum, GeometryRange, MaterialSystem, MaterialSystemConfig,
    RefDef, TextureId, WorldScene,
};

/// Acquire a GPU device, or None to skip the test on headless runners.
fn init_gpu() -> Option<(Arc<wgpu::Device>, Arc<wgpu::Queue>)> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;

    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("Material Pipeline Test Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
        },
        None,
    ))
    .ok()?;

    Some((Arc::new(device), Arc::new(queue)))
}

fn read_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    offset: u64,
    size: u64,
) -> Vec<u8> {
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Test Readback Buffer"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&Default::default());
    encoder.copy_buffer_to_buffer(buffer, offset, &staging, 0, size);
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        sender.send(result).ok();
    });
    device.poll(wgpu::Maintain::Wait);
    pollster::block_on(receiver)
        .expect("map callback ran")
        .expect("readback mapped");

    let data = slice.get_mapped_range().to_vec();
    staging.unmap();
    data
}

fn world_surface(shader: u32, index_count: u32) -> DrawSurface {
    DrawSurface {
        shader: Some(basalt::ShaderId(shader)),
        geometry: GeometryRange {
            buffers: 0,
            index_count,
            first_index: 0,
            base_vertex: 0,
        },
        bounds: BoundingSphere {
            origin: Vec3::ZERO,
            radius: 8.0,
        },
        world_surface: true,
        bsp_surface: true,
        ..Default::default()
    }
}

fn opaque_shader(stages: Vec<ShaderStage>) -> Shader {
    Shader {
        name: "test".into(),
        sort: ShaderSort::Opaque,
        stages,
        ..Default::default()
    }
}

/// Zeroed planes accept every sphere.
fn open_frustum() -> Frustum {
    Frustum::default()
}

#[test]
fn s1_empty_world() -> Result<()> {
    let Some((device, queue)) = init_gpu() else {
        println!("Skipping GPU test - no adapter available");
        return Ok(());
    };

    let mut system = MaterialSystem::new(device, queue, MaterialSystemConfig::default());
    let scene = WorldScene::default();
    system.generate_world_materials(&scene, &RefDef::default())?;

    assert_eq!(system.total_draw_surfs(), 0);
    for pack in system.packs() {
        assert!(pack.materials.is_empty());
    }
    let layout = system.materials_layout();
    assert_eq!(layout.total_words, 0);
    assert_eq!(layout.dynamic_size_words, 0);
    assert_eq!(system.surface_commands_count(), 0);
    Ok(())
}

#[test]
fn s2_single_opaque_surface_culls_to_one_command() -> Result<()> {
    let Some((device, queue)) = init_gpu() else {
        println!("Skipping GPU test - no adapter available");
        return Ok(());
    };

    let mut scene = WorldScene::default();
    scene.shaders.push(opaque_shader(vec![ShaderStage::default()]));
    scene.surfaces.push(world_surface(0, 36));

    let mut system =
        MaterialSystem::new(device.clone(), queue.clone(), MaterialSystemConfig::default());
    system.generate_world_materials(&scene, &RefDef::default())?;

    // One generic3d material in the opaque pack, static only.
    assert_eq!(system.packs()[DEPTH_PACK as usize].materials.len(), 0);
    let opaque = &system.packs()[OPAQUE_PACK as usize];
    assert_eq!(opaque.materials.len(), 1);
    let material = &opaque.materials[0];
    assert_eq!(material.family, StageFamily::Generic3D);
    assert_eq!(material.total_static_draw_surf_count, 1);
    assert_eq!(material.total_dynamic_draw_surf_count, 0);

    let layout = system.materials_layout();
    assert_eq!(layout.total_words, material.padded_stride_words);
    assert_eq!(layout.dynamic_size_words, 0);

    // Cull one view; the surface must survive and compact into exactly
    // one indirect command.
    system.start_frame();
    system.queue_surface_cull(0, Vec3::ZERO, &open_frustum());

    let mut encoder = device.create_command_encoder(&Default::default());
    system.update_frame_data(&mut encoder);
    system.cull_surfaces(&mut encoder, &RefDef::default(), None);
    queue.submit(Some(encoder.finish()));
    device.poll(wgpu::Maintain::Wait);

    let frame = system.next_frame();
    let buffers = system.pipeline_buffers().expect("world buffers allocated");

    let culled_offset = calculations::culled_commands_byte_offset(
        0,
        system.surface_commands_count(),
        frame,
        0,
    );
    let raw = read_buffer(&device, &queue, &buffers.culled_commands, culled_offset, 20);
    let command: IndirectCommand = bytemuck::pod_read_unaligned(&raw);
    assert_eq!(command.index_count, 36);
    assert_eq!(command.instance_count, 1);
    assert_eq!(command.base_instance, 0);

    let counter_offset = calculations::counter_byte_offset(0, frame, 0);
    let raw = read_buffer(&device, &queue, &buffers.atomic_counters, counter_offset, 4);
    assert_eq!(u32::from_le_bytes(raw.try_into().unwrap()), 1);
    Ok(())
}

#[test]
fn s3_two_stages_get_sync_ordered_materials() -> Result<()> {
    let Some((device, queue)) = init_gpu() else {
        println!("Skipping GPU test - no adapter available");
        return Ok(());
    };

    let mut scene = WorldScene::default();
    scene.shaders.push(opaque_shader(vec![
        ShaderStage::default(),
        ShaderStage {
            state_bits: state_bits::DEPTHMASK_TRUE,
            ..Default::default()
        },
    ]));
    scene.surfaces.push(world_surface(0, 12));

    let mut system = MaterialSystem::new(device, queue, MaterialSystemConfig::default());
    system.generate_world_materials(&scene, &RefDef::default())?;

    let opaque = &system.packs()[OPAQUE_PACK as usize];
    assert_eq!(opaque.materials.len(), 2);
    assert!(opaque.materials[1].use_sync);
    assert_eq!(opaque.materials[1].sync_material, opaque.materials[0].id);
    assert!(opaque.materials[1].id > opaque.materials[0].id);

    // Ids are dense within the pack.
    for (index, material) in opaque.materials.iter().enumerate() {
        assert_eq!(material.id, index as u32);
    }
    Ok(())
}

#[test]
fn s4_dynamic_waveform_stage_rewrites_each_frame() -> Result<()> {
    let Some((device, queue)) = init_gpu() else {
        println!("Skipping GPU test - no adapter available");
        return Ok(());
    };

    let waveform_stage = ShaderStage {
        rgb_gen: ColorGen::Waveform,
        rgb_wave: Waveform {
            func: WaveFunc::Sawtooth,
            base: 0.0,
            amplitude: 1.0,
            phase: 0.0,
            frequency: 1.0,
        },
        ..Default::default()
    };

    let mut scene = WorldScene::default();
    scene.shaders.push(opaque_shader(vec![waveform_stage]));
    scene.surfaces.push(world_surface(0, 12));

    let mut system =
        MaterialSystem::new(device.clone(), queue.clone(), MaterialSystemConfig::default());
    system.generate_world_materials(&scene, &RefDef::default())?;

    let layout = *system.materials_layout();
    assert!(layout.dynamic_size_words > 0);

    // The stage's slot lies strictly inside the dynamic region.
    let record = system.record(basalt::DrawSurfId(0)).unwrap();
    let assignment = &record.stages[0];
    assert!(assignment.dynamics.dynamic);
    let material = &system.packs()[OPAQUE_PACK as usize].materials[0];
    let slot_begin = assignment.ssbo_slot as u64 * material.padded_stride_words as u64 * 4;
    let slot_end = slot_begin + material.padded_stride_words as u64 * 4;
    assert!(slot_end <= layout.dynamic_size_bytes());

    // Two rewrites at different shader times must produce different
    // bytes in the dynamic region.
    let read_dynamic = |system: &MaterialSystem| {
        let buffers = system.pipeline_buffers().expect("world buffers allocated");
        read_buffer(
            &device,
            &queue,
            &buffers.materials,
            layout.dynamic_offset_bytes(),
            layout.dynamic_size_bytes(),
        )
    };

    system.update_dynamic_surfaces(
        &scene,
        &RefDef {
            float_time: 0.1,
            ..Default::default()
        },
    );
    let first = read_dynamic(&system);

    system.update_dynamic_surfaces(
        &scene,
        &RefDef {
            float_time: 0.7,
            ..Default::default()
        },
    );
    let second = read_dynamic(&system);

    assert_ne!(first, second);
    Ok(())
}

#[test]
fn s5_portal_free_world_expands_trivially() -> Result<()> {
    let Some((device, queue)) = init_gpu() else {
        println!("Skipping GPU test - no adapter available");
        return Ok(());
    };

    let mut scene = WorldScene::default();
    scene.shaders.push(opaque_shader(vec![ShaderStage::default()]));
    scene.surfaces.push(world_surface(0, 12));

    let mut system = MaterialSystem::new(device, queue, MaterialSystemConfig::default());
    system.generate_world_materials(&scene, &RefDef::default())?;

    let expansion = system.add_portal_surfaces(&mut |_| false)?;
    assert!(expansion.complete);
    assert_eq!(expansion.view_count, 1);
    Ok(())
}

#[test]
fn s6_texture_residency_evicts_and_recovers() -> Result<()> {
    let Some((device, queue)) = init_gpu() else {
        println!("Skipping GPU test - no adapter available");
        return Ok(());
    };

    let capacity = 4usize;
    let material_count = 6u32;

    let mut scene = WorldScene::default();
    for index in 0..material_count {
        // Distinct state bits force distinct materials; each references
        // its own texture so the table oversubscribes.
        scene.shaders.push(opaque_shader(vec![ShaderStage {
            state_bits: index << 16 & state_bits::COLORMASK_BITS,
            bundles: vec![basalt::shader::TextureBundle::single(TextureId(index))],
            ..Default::default()
        }]));
        scene.textures.push(basalt::scene::TextureResource {
            name: format!("texture{index}"),
            view: None,
        });
        scene.surfaces.push(world_surface(index, 12));
    }

    let config = MaterialSystemConfig {
        bindless_capacity: capacity,
        ..Default::default()
    };
    let mut system = MaterialSystem::new(device.clone(), queue, config);
    system.generate_world_materials(&scene, &RefDef::default())?;
    assert_eq!(
        system.packs()[OPAQUE_PACK as usize].materials.len(),
        material_count as usize
    );

    system.start_frame();
    let mut encoder = device.create_command_encoder(&Default::default());
    system.prepare_frame(&mut encoder, &scene, &RefDef::default());
    drop(encoder);

    // Rendering completed the acquisition pass for every material, the
    // table never oversubscribed, and at least one early texture was
    // evicted to make room.
    assert!(system.residency().resident_count() <= capacity);
    assert!(!system.residency().is_resident(TextureId(0)));
    assert!(system.residency().is_resident(TextureId(material_count - 1)));
    for pack in system.packs() {
        for material in &pack.materials {
            assert!(material.textures_resident);
        }
    }
    Ok(())
}

#[test]
fn materials_buffer_padding_law_holds_for_mixed_world() -> Result<()> {
    let Some((device, queue)) = init_gpu() else {
        println!("Skipping GPU test - no adapter available");
        return Ok(());
    };

    let mut scene = WorldScene::default();
    // A depth pre-pass shader, a lightmapped shader, and a liquid shader
    // with a dynamic expression mix strides and regions.
    scene.shaders.push(Shader {
        sort: ShaderSort::Depth,
        stages: vec![ShaderStage::default()],
        ..Default::default()
    });
    scene.shaders.push(opaque_shader(vec![ShaderStage {
        stage_type: basalt::shader::StageType::DiffuseMap,
        ..Default::default()
    }]));
    scene.shaders.push(Shader {
        sort: ShaderSort::Blend,
        stages: vec![ShaderStage {
            stage_type: basalt::shader::StageType::LiquidMap,
            fog_density_exp: basalt::shader::Expression::constant(0.02),
            ..Default::default()
        }],
        ..Default::default()
    });

    for shader in 0..3u32 {
        for _ in 0..3 {
            scene.surfaces.push(world_surface(shader, 24));
        }
    }

    let mut system = MaterialSystem::new(device, queue, MaterialSystemConfig::default());
    system.generate_world_materials(&scene, &RefDef::default())?;

    for pack in system.packs() {
        for material in &pack.materials {
            assert_eq!(material.static_ssbo_offset % material.padded_stride_words, 0);
            assert_eq!(
                material.dynamic_ssbo_offset % material.padded_stride_words,
                0
            );
        }
    }

    // Every (surface, stage) resolved to exactly one material and a slot
    // inside its region.
    for index in 0..scene.surfaces.len() {
        let record = system.record(basalt::DrawSurfId(index as u32)).unwrap();
        assert_eq!(record.stages.len(), 1);
    }
    Ok(())
}
